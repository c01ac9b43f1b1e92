use bootgpt::{GptConfig, GptStatus};

use std::error::Error;

fn main() {
    // Inspect disk image, handling errors.
    if let Err(e) = run() {
        eprintln!("Failed to inspect image: {}", e);
        std::process::exit(1)
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    // usage: inspect <image> [--repair]
    let mut args = std::env::args().skip(1);
    let input = args.next().ok_or("missing disk image path")?;
    let repair = args.next().as_deref() == Some("--repair");

    let cfg = GptConfig::new().writable(repair);
    let mut disk = cfg.open(input)?;
    let mut gpt = cfg.read(&mut disk)?;

    println!("Status: {:?}", gpt.status());
    println!("Primary header:\n{}\n", gpt.primary_header());
    println!("Backup header:\n{}\n", gpt.backup_header());
    for (n, part) in gpt.partitions() {
        println!("Entry {}\n{}\n", n, part);
    }

    if repair && !gpt.status().contains(GptStatus::BOTH_VALID) {
        gpt.repair(&disk)?;
        gpt.write(&mut disk)?;
        println!("Repaired, status: {:?}", gpt.status());
    }

    Ok(())
}
