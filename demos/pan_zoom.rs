use std::collections::VecDeque;

use anyhow::{Context, Result};
use chartflow::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HOUR: i64 = 3_600_000;

fn main() -> Result<()> {
    init_tracing();

    let config = EngineConfig::from_json_str(r#"{ "fetch_batch_size": 200, "prefetch_frames": 1 }"#)
        .context("Failed to parse engine config")?;
    let mut chart = Chart::new(Exchange::default(), Interval(HOUR), config)?
        .with_extension(Box::new(TrueRange));

    let renko = chart.add_derived("renko-25", BarCompute::new(Renko::new(25.0)?))?;
    let ema = chart.add_derived(
        "ema-20",
        IndicatorCompute::new(Ema::new(20)?, SourceField::Close),
    )?;
    chart.subscribe(
        renko,
        Box::new(|c| info!(change = %c, "Renko bricks updated")),
    )?;

    chart.bind_viewport(SeriesId::Raw, Uid::at(500 * HOUR), 60, 1200)?;
    chart.load(ema, Uid::at(500 * HOUR), 60)?;
    chart.load(renko, Uid::at(500 * HOUR), 30)?;
    drain(&mut chart)?;

    for dx in [240.0, 240.0, -900.0] {
        chart.pan(dx)?;
        drain(&mut chart)?;
        let (first, last) = chart.range()?;
        println!("pan {dx:>7}: {} .. {}", first.date(), last.date());
    }

    chart.zoom(-1)?;
    chart.zoom(-1)?;
    drain(&mut chart)?;
    let vp = chart.viewport().context("viewport bound above")?;
    println!("zoomed out to {} slots", vp.n());

    let labels = chart.grid(&DayBoundary)?;
    println!("{} day boundaries visible", labels.len());

    println!("\n--- Resident Data ---");
    println!("raw:    {}", chart.store(SeriesId::Raw)?.len());
    println!("ema:    {}", chart.store(ema)?.len());
    println!("renko:  {}", chart.store(renko)?.len());

    Ok(())
}

/// Answers queued provider calls until the chart is satisfied.
fn drain(chart: &mut Chart<Exchange>) -> Result<()> {
    while let Some((id, request)) = chart.provider_mut().queue.pop_front() {
        let batch = chart.provider_mut().answer(request);
        chart.complete(id, Ok(batch))?;
    }
    Ok(())
}

// ================================================================================================
// In-Memory Exchange
// ================================================================================================

/// A synthetic hourly market covering hours 0..2000.
#[derive(Debug, Default)]
struct Exchange {
    queue: VecDeque<(RequestId, LoadRequest)>,
}

impl Exchange {
    const HOURS: i64 = 2_000;

    fn candle(hour: i64) -> Candle {
        let t = hour as f64;
        let close = 1_000.0 + 80.0 * (t / 37.0).sin() + 15.0 * (t / 5.0).cos();
        let open = close - 4.0 * (t / 3.0).sin();
        Candle::ohlc(
            Uid::at(hour * HOUR),
            open,
            open.max(close) + 3.0,
            open.min(close) - 3.0,
            close,
        )
        .with_volume(100.0 + (hour % 17) as f64)
    }

    fn answer(&self, request: LoadRequest) -> Vec<Candle> {
        let hours: Vec<i64> = match request.amount() {
            AmountRange::Bounded { start, end } => {
                (start.timestamp.div_euclid(HOUR)..=end.timestamp.div_euclid(HOUR)).collect()
            }
            AmountRange::Counted { start, count } => {
                let from = start.timestamp.div_euclid(HOUR);
                if count > 0 {
                    (from..from + count).collect()
                } else {
                    (from + count + 1..=from).collect()
                }
            }
        };
        hours
            .into_iter()
            .filter(|h| (0..Self::HOURS).contains(h))
            .map(Self::candle)
            .collect()
    }
}

impl RawProvider for Exchange {
    fn load(&mut self, id: RequestId, from: Uid, count: i64) {
        self.queue.push_back((id, LoadRequest::counted(from, count)));
    }

    fn load_range(&mut self, id: RequestId, first: Uid, last: Uid) {
        self.queue.push_back((id, LoadRequest::range(first, last)));
    }
}

// ================================================================================================
// Tracing Configuration
// ================================================================================================

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}
