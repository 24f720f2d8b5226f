// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    let banner = r#"
                _      _
  ___ ___   __| | ___| |__   _____  __
 / __/ _ \ / _` |/ _ \ '_ \ / _ \ \/ /
| (_| (_) | (_| |  __/ |_) | (_) >  <
 \___\___/ \__,_|\___|_.__/ \___/_/\_\

    Sandboxed Code Execution Service
"#;
    println!("{}", banner);
}
