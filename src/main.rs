fn main() {
    if let Err(error) = studytrack::run() {
        eprintln!("studytrack failed to start: {error}");
        std::process::exit(1);
    }
}
