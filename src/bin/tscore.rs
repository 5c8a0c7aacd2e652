//! tscore - inspect and exercise the engine core from the command line.
//!
//! Subcommands:
//!   tscore ops      # dump the operator table
//!   tscore agg      # run a few operators over generated data
//!   tscore timer    # start demo timers, Ctrl-C to exit

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tikv_jemallocator::Jemalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tscore::block::ColumnData;
use tscore::exec::table::{
    FUNCSTATE_MO, FUNCSTATE_NEED_TS, FUNCSTATE_SELECTIVITY, FUNCSTATE_SO, FUNCSTATE_STREAM,
    FUNCSTATE_METRIC,
};
use tscore::exec::{
    result_data_info, Aggregator as _, BlockInput, EvalCtx, FuncId, OpInit, Param, COMPAT,
    FUNC_TABLE,
};
use tscore::timer;
use tscore::types::ScalarType;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Engine core inspector and demo driver.
#[derive(Parser)]
#[command(name = "tscore", about = "Time-series engine core tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the operator table.
    Ops,
    /// Run representative aggregations over generated data.
    Agg {
        /// Number of generated rows.
        #[arg(long, default_value_t = 1000)]
        rows: usize,
    },
    /// Start a handful of demo timers and log their fires.
    Timer {
        /// Number of timers to start.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::Ops => dump_ops(),
        Command::Agg { rows } => run_agg(rows),
        Command::Timer { count } => run_timer(count),
    }
}

fn caps_string(caps: u32) -> String {
    let mut out = Vec::new();
    if caps & FUNCSTATE_SO != 0 {
        out.push("SO");
    }
    if caps & FUNCSTATE_MO != 0 {
        out.push("MO");
    }
    if caps & FUNCSTATE_STREAM != 0 {
        out.push("STREAM");
    }
    if caps & FUNCSTATE_METRIC != 0 {
        out.push("METRIC");
    }
    if caps & FUNCSTATE_NEED_TS != 0 {
        out.push("NEED_TS");
    }
    if caps & FUNCSTATE_SELECTIVITY != 0 {
        out.push("SELECTIVITY");
    }
    out.join("|")
}

fn dump_ops() {
    println!("{:>3}  {:<14}{:<12}{:>6}   {}", "id", "name", "dist", "compat", "caps");
    for (i, desc) in FUNC_TABLE.iter().enumerate() {
        let dist = desc
            .dist_id
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>3}  {:<14}{:<12}{:>6}   {}",
            i,
            desc.name,
            dist,
            COMPAT[i],
            caps_string(desc.caps)
        );
    }
}

fn run_agg(rows: usize) {
    // a noisy ramp with some nulls sprinkled in
    let values: Vec<Option<i32>> = (0..rows)
        .map(|i| {
            if i % 13 == 0 {
                None
            } else {
                Some((i as i32 % 97) - 11)
            }
        })
        .collect();
    let ts: Vec<i64> = (0..rows as i64).map(|i| i * 10).collect();
    let col = ColumnData::from_i32s(&values);

    let init = OpInit {
        data_ty: ScalarType::Int,
        data_bytes: 4,
        param: 0,
        tag_len: 0,
        super_table: false,
    };

    for func in [FuncId::Count, FuncId::Sum, FuncId::Avg, FuncId::Min, FuncId::Max, FuncId::Spread]
    {
        let info = result_data_info(ScalarType::Int, 4, func, 0, 0, false).unwrap();
        let mut op = func.descriptor().new_op(&init);
        let mut ctx = EvalCtx::new(info.out_ty, info.out_bytes, 1);
        ctx.res.buf_len = info.inter_bytes;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));
        op.finalize(&mut ctx);
        println!("{:<8} -> {:?}", func.name(), ctx.out.datum_at(0));
    }

    // top-3 by value
    let info = result_data_info(ScalarType::Int, 4, FuncId::Top, 3, 0, false).unwrap();
    let mut op = FuncId::Top.descriptor().new_op(&OpInit { param: 3, ..init });
    let mut ctx = EvalCtx::new(info.out_ty, info.out_bytes, 3).with_ts_output(3);
    ctx.params[0] = Param::I64(3);
    ctx.params[1] = Param::I64(1);
    ctx.params[2] = Param::I64(1);
    op.setup(&mut ctx);
    op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));
    op.finalize(&mut ctx);
    let top: Vec<_> = (0..ctx.res.num_of_res as isize).map(|i| ctx.out.i64_at(i)).collect();
    println!("top3     -> {top:?}");
}

fn run_timer(count: usize) {
    let ctrl = timer::init(count, timer::MSECONDS_PER_TICK, 60_000, "demo")
        .expect("timer controller");

    for i in 0..count {
        let delay = 200 + (i as u64 * 137) % 2_000;
        let id = timer::start(
            ctrl,
            delay,
            Box::new(move |id| info!(id, delay, "timer fired")),
        );
        info!(?id, delay, "timer scheduled");
    }
    info!(count, "timers started, waiting for Ctrl-C");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)).expect("install Ctrl-C handler");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    timer::cleanup(ctrl);
    info!("bye");
}
