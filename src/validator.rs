//! Extraction of a port name from a caller supplied connection string.

/// Checks the format of a connection string and pulls the port name out of it.
pub trait PortValidator: Send + Sync {
    /// The port name inside `init_string`, or `None` if the string is malformed.
    fn port_name<'a>(&self, init_string: &'a str) -> Option<&'a str>;
}

/// Accepts Windows style `COM<n>` names and `/dev/...` device paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComPortValidator;

impl PortValidator for ComPortValidator {
    fn port_name<'a>(&self, init_string: &'a str) -> Option<&'a str> {
        let name = init_string.trim();
        let is_com = name
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("COM"))
            && name.len() > 3
            && name[3..].bytes().all(|b| b.is_ascii_digit());
        let is_dev = name.len() > "/dev/".len()
            && name.starts_with("/dev/")
            && !name.contains(char::is_whitespace);
        (is_com || is_dev).then_some(name)
    }
}
