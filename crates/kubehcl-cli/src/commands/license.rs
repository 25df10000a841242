//! License command

const APACHE_URL: &str = "https://www.apache.org/licenses/LICENSE-2.0";
const MPL_URL: &str = "https://www.mozilla.org/en-US/MPL/2.0/";

pub fn run() {
    println!("This project is dual license by MPL 2.0 and Apache 2.0");
    println!("Apache 2.0: {}", APACHE_URL);
    println!("MPL 2.0: {}", MPL_URL);
}
