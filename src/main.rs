use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    soul_of_waifu::cli::main()
}
