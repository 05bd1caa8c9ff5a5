use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    floodmap::cli::run(std::env::args().skip(1))
}
