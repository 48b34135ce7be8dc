fn main() {
    let dump = tests::generate_dump(&mut rand::thread_rng());
    match serde_json::to_string_pretty(&dump) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed serializing test data: {err}");
            std::process::exit(1);
        }
    }
}
