/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads an environment variable and parses it, logging nothing. Returns `default` if the variable is missing
/// or cannot be parsed. The caller is told which of the two happened through the `Err` branch.
pub fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, (T, String)> {
    match std::env::var(name) {
        Ok(s) => s.trim().parse::<T>().map_err(|_| (default, format!("{name} has an invalid value: '{s}'"))),
        Err(_) => Err((default, format!("{name} is not set"))),
    }
}
