fn main() {
    if let Err(e) = voice_controller::run() {
        log::error!("voice-ctl failed: {:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
