// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Best-effort ROS 2 name demangling, enabled by `recorder.ros2-types`
//! (`spec §6`). ROS 2's RMW layer mangles topic and type names before
//! they ever reach the DDS wire; this undoes the common conventions so
//! recorded channel names read the way a ROS 2 user would expect.

/// Strip the RMW topic-role prefix (`rt/` topics, `rq/`/`rr/` services,
/// `rs/` actions) and the request/reply suffix DDS services add.
pub fn demangle_topic(name: &str) -> String {
    for prefix in ["rt/", "rq/", "rr/", "rs/"] {
        if let Some(stripped) = name.strip_prefix(prefix) {
            return stripped
                .strip_suffix("Request")
                .or_else(|| stripped.strip_suffix("Reply"))
                .unwrap_or(stripped)
                .to_string();
        }
    }
    name.to_string()
}

/// `pkg::msg::dds_::Type_` (the CDR-generated mangled type name) back to
/// `pkg/msg/Type`.
pub fn demangle_type(name: &str) -> String {
    let Some(stripped) = name.strip_suffix('_') else {
        return name.to_string();
    };
    let parts: Vec<&str> = stripped.split("::").filter(|p| *p != "dds_").collect();
    if parts.len() < 2 {
        return name.to_string();
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_topic_role_prefix() {
        assert_eq!(demangle_topic("rt/chatter"), "chatter");
        assert_eq!(demangle_topic("chatter"), "chatter");
    }

    #[test]
    fn strips_service_request_suffix() {
        assert_eq!(demangle_topic("rq/add_two_intsRequest"), "add_two_ints");
    }

    #[test]
    fn demangles_message_type() {
        assert_eq!(
            demangle_type("std_msgs::msg::dds_::String_"),
            "std_msgs/msg/String"
        );
    }

    #[test]
    fn leaves_unmangled_type_alone() {
        assert_eq!(demangle_type("sensor_msgs/Temperature"), "sensor_msgs/Temperature");
    }
}
