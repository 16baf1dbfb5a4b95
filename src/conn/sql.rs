//! Session-level SQL issued by the connection itself.
//!
//! Everything that quotes a channel or statement name goes through here so
//! replay, subscribe and teardown paths cannot drift apart.

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn listen(channel: &str) -> String {
    format!("LISTEN {}", quoted(channel))
}

pub(crate) fn unlisten(channel: &str) -> String {
    format!("UNLISTEN {}", quoted(channel))
}

pub(crate) fn set(name: &str, value: &str) -> String {
    format!("SET {}={}", name, value)
}

pub(crate) fn show(name: &str) -> String {
    format!("SHOW {}", name)
}

pub(crate) fn deallocate(statement: &str) -> String {
    format!("DEALLOCATE {}", quoted(statement))
}

/// One request restoring every subscription and session variable.
pub(crate) fn restore<'a>(
    channels: impl Iterator<Item = &'a str>,
    vars: impl Iterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    let mut script = String::new();
    for channel in channels {
        script.push_str(&listen(channel));
        script.push_str("; ");
    }
    for (name, value) in vars {
        script.push_str(&set(name, value));
        script.push_str("; ");
    }
    (!script.is_empty()).then_some(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(listen("jobs"), "LISTEN \"jobs\"");
        assert_eq!(unlisten("a\"b"), "UNLISTEN \"a\"\"b\"");
        assert_eq!(deallocate("stmt"), "DEALLOCATE \"stmt\"");
        assert_eq!(set("search_path", "public"), "SET search_path=public");
        assert_eq!(show("DateStyle"), "SHOW DateStyle");
    }

    #[test]
    fn restore_script() {
        assert_eq!(restore(std::iter::empty(), std::iter::empty()), None);
        let script = restore(
            ["a", "b"].into_iter(),
            [("x", "1")].into_iter(),
        )
        .unwrap();
        assert_eq!(script, "LISTEN \"a\"; LISTEN \"b\"; SET x=1; ");
    }
}
