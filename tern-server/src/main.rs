//! Binary entrypoint for `tern-server`.

mod app;
mod workload;

fn main() {
    if let Err(err) = app::run() {
        eprintln!("failed to start tern-server: {err}");
        std::process::exit(1);
    }
}
