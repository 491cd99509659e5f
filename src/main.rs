fn main() {
    if let Err(err) = osmseg::cli::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
