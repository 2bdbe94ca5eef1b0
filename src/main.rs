fn main() {
    if let Err(e) = triageai_lib::run() {
        tracing::error!(error = %e, "TriageAI failed to start");
        eprintln!("triageai: {e}");
        std::process::exit(1);
    }
}
