use kill_tree::{blocking::kill_tree_with_config, Config};
use std::process::Command;
use tracing::{debug, info, warn};

/// Pids listening on a TCP port, one per line as printed by `lsof -t`
fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn listening_pids(port: u16) -> std::io::Result<Vec<u32>> {
    let output = Command::new("lsof")
        .args(["-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()?;
    // lsof exits 1 when nothing matches
    Ok(parse_pids(&String::from_utf8_lossy(&output.stdout)))
}

/// Kill whatever is still listening on `port`, along with its children, and return the
/// pids that were terminated. Failures are logged and otherwise ignored.
pub fn free_port(port: u16) -> Vec<u32> {
    let own_pid = std::process::id();
    let pids = match listening_pids(port) {
        Ok(pids) => pids,
        Err(e) => {
            warn!(port, error = %e, "could not look up listeners");
            return Vec::new();
        }
    };

    let config = Config {
        signal: "SIGKILL".to_string(),
        ..Default::default()
    };
    let mut killed = Vec::new();
    for pid in pids.into_iter().filter(|&pid| pid != own_pid) {
        let outputs = match kill_tree_with_config(pid, &config) {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(pid, error = %e, "failed to kill stale listener");
                continue;
            }
        };
        for output in outputs {
            match output {
                kill_tree::Output::Killed { process_id, .. } => {
                    killed.push(process_id);
                }
                kill_tree::Output::MaybeAlreadyTerminated { process_id, .. } => {
                    debug!(pid = process_id, "process already gone");
                }
            }
        }
    }

    if !killed.is_empty() {
        info!(port, pids = ?killed, "freed port");
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("4242\n17\n4242\n\n"), vec![17, 4242]);
        assert!(parse_pids("").is_empty());
        assert!(parse_pids("lsof: WARNING\n").is_empty());
    }

    #[test]
    fn test_free_port_without_listener_is_a_no_op() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(free_port(port).is_empty());
    }

    #[test]
    fn test_free_port_never_kills_itself() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(free_port(port).is_empty());
        assert!(listener.local_addr().is_ok());
    }
}
