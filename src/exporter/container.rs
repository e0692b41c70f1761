//! Container id detection for the `Datadog-Container-ID` request header.
//!
//! The id is scraped from `/proc/self/cgroup`. Each line looks like
//! `id:controllers:path`; the container id, when present, is the last path
//! segment in one of the shapes container runtimes use.

use std::fs;

const CGROUP_PATH: &str = "/proc/self/cgroup";

/// Container id of the current process, if it runs in a recognized container.
pub(crate) fn container_id() -> Option<String> {
    parse_cgroup_contents(&fs::read_to_string(CGROUP_PATH).ok()?)
}

fn parse_cgroup_contents(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let path = line.splitn(3, ':').nth(2)?;
        let segment = path.rsplit('/').next()?;
        extract_container_id(segment)
    })
}

/// Recognizes the id shapes runtimes write: a plain 64-digit hex id, a
/// `docker-<id>.scope` style systemd unit, a UUID, or an ECS task id.
fn extract_container_id(segment: &str) -> Option<String> {
    let segment = segment.strip_suffix(".scope").unwrap_or(segment);
    let segment = segment
        .strip_prefix("docker-")
        .or_else(|| segment.strip_prefix("crio-"))
        .or_else(|| segment.strip_prefix("containerd-"))
        .unwrap_or(segment);

    if is_hex(segment, 64) || is_uuid(segment) || is_ecs_task_id(segment) {
        Some(segment.to_string())
    } else {
        None
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

fn is_uuid(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(&parts)
            .all(|(len, part)| is_hex(part, *len))
}

fn is_ecs_task_id(value: &str) -> bool {
    match value.split_once('-') {
        Some((task, sequence)) => {
            is_hex(task, 32) && !sequence.is_empty() && sequence.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKER_ID: &str = "3726184226f5d3147c25fdeab5b60097e378e8a720503a5e19ecfdf29f869860";

    #[test]
    fn plain_docker_cgroup() {
        let contents = format!("13:name=systemd:/docker/{DOCKER_ID}\n12:pids:/docker/{DOCKER_ID}");
        assert_eq!(parse_cgroup_contents(&contents).as_deref(), Some(DOCKER_ID));
    }

    #[test]
    fn systemd_scope_unit() {
        let contents =
            format!("1:name=systemd:/system.slice/docker-{DOCKER_ID}.scope");
        assert_eq!(parse_cgroup_contents(&contents).as_deref(), Some(DOCKER_ID));
    }

    #[test]
    fn kubernetes_uuid_pod() {
        let contents =
            "11:perf_event:/kubepods/besteffort/pod123/34dc0b5e-626f-2c5c-4c51-70e34b10e765";
        assert_eq!(
            parse_cgroup_contents(contents).as_deref(),
            Some("34dc0b5e-626f-2c5c-4c51-70e34b10e765")
        );
    }

    #[test]
    fn ecs_task_id() {
        let contents =
            "9:perf_event:/ecs/haissam-ecs-classic/5a0d5ceddf6c44c1928d367a815d890f/38fac3e99302b3622be089dd41e7ccf38aff368a86cc339972075136ee2710ce";
        assert_eq!(
            parse_cgroup_contents(contents).as_deref(),
            Some("38fac3e99302b3622be089dd41e7ccf38aff368a86cc339972075136ee2710ce")
        );
        assert!(is_ecs_task_id(
            "34dc0b5e626f2c5c4c5170e34b10e765-1234567890"
        ));
    }

    #[test]
    fn host_cgroup_has_no_container_id() {
        let contents = "12:cpu,cpuacct:/\n11:memory:/user.slice";
        assert_eq!(parse_cgroup_contents(contents), None);
        assert_eq!(parse_cgroup_contents(""), None);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let contents = format!("not a cgroup line\n4:pids:/docker/{DOCKER_ID}");
        assert_eq!(parse_cgroup_contents(&contents).as_deref(), Some(DOCKER_ID));
    }
}
