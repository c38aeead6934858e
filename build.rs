use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=MCUBOOT_LIB_DIR");

    let target = env::var("TARGET").unwrap_or_default();

    if target.contains("avr") {
        // Configure for ATmega128
        println!("cargo:rustc-link-arg=-mmcu=atmega128");

        // Keep 0x0100..0x0200 for the bootloader's shared records;
        // must match config::DATA_START
        println!("cargo:rustc-link-arg=-Wl,-Tdata=0x800200");

        // Pass CPU frequency for timing calculations
        println!("cargo:rustc-env=MCU_FREQ_HZ=16000000");
        println!("cargo:warning=Building for ATmega128 at 16MHz");
    }

    // The bootloader library is prebuilt alongside the bootloader image
    if env::var("CARGO_FEATURE_MCUBOOT").is_ok() {
        if let Ok(dir) = env::var("MCUBOOT_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
            println!("cargo:rustc-link-lib=static=bootutil");
        } else if target.contains("avr") {
            println!("cargo:warning=MCUBOOT_LIB_DIR not set, bootutil must be linked manually");
        }
    }
}
