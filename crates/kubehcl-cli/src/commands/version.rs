//! Version command

pub fn run() {
    println!("Kubehcl v{}", env!("CARGO_PKG_VERSION"));
}
