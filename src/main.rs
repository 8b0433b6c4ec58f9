fn main() {
    if let Err(e) = stewardgate::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
