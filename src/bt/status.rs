// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

///
/// The tri-valued result of ticking a behavior tree node.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Running,
    Success,
    Failure,
}

impl Status {
    ///
    /// The wire representation used across the host/script boundary.
    ///
    pub fn wire(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Success => "success",
            Status::Failure => "failure",
        }
    }

    ///
    /// Parse the wire representation. Anything that is not one of the three status strings maps
    /// to `Failure`.
    ///
    pub fn from_wire(value: &str) -> Status {
        match value {
            "running" => Status::Running,
            "success" => Status::Success,
            _ => Status::Failure,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire())
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn wire_round_trip() {
        for status in [Status::Running, Status::Success, Status::Failure] {
            assert_eq!(Status::from_wire(status.wire()), status);
        }
    }

    #[test]
    fn unknown_strings_map_to_failure() {
        assert_eq!(Status::from_wire(""), Status::Failure);
        assert_eq!(Status::from_wire("succeeded"), Status::Failure);
        assert_eq!(Status::from_wire("RUNNING"), Status::Failure);
    }
}
