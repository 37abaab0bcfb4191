fn main() {
    if let Err(err) = ticket_cleaner::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
