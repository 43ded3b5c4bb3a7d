use clap::Parser;
use schedcheck::{
    config::DEFAULT_BUSY_LOOP,
    probe::RunningProbe,
    proc::{ProcTasks, StatReader},
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Print the raw and probed scheduling state of every thread of a process"
)]
struct Args {
    /// Process to inspect (defaults to this one)
    pid: Option<u32>,
    /// Spin iterations used to tell running threads from ready ones
    #[arg(long, default_value_t = DEFAULT_BUSY_LOOP)]
    busy_loop: u64,
}

fn main() {
    schedcheck::init_logging();
    let args = Args::parse();

    let source = match args.pid {
        Some(pid) => ProcTasks::for_pid(pid),
        None => ProcTasks::current_process(),
    };
    let reader = StatReader::new(source);

    let rows = RunningProbe::new(args.busy_loop).survey(&reader);

    println!("{:>8}  {:<4} {:>8} {:>5}  STATE", "TID", "RAW", "TICKS", "PRIO");
    for (tid, rec, state) in &rows {
        println!(
            "{:>8}  {:<4} {:>8} {:>5}  {}",
            tid,
            rec.state_char().unwrap_or('?'),
            rec.cpu_ticks(),
            rec.rt_priority().map_or_else(|| "-".to_string(), |p| p.to_string()),
            state
        );
    }
}
