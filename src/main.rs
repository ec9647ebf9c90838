use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    parley::cli::main()
}
