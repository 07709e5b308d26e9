//! Connection summary written after a successful start.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::LabConfig;
use crate::env::LabSecrets;
use crate::error::Result;
use crate::fsutil::write_atomic;

/// File name of the summary inside the project directory.
pub const CONNECTION_FILE: &str = "lab_connections.txt";

const CONNECTION_FILE_MODE: u32 = 0o600;

/// Build the summary text, stamped with the current time. `file_name` is
/// where the summary will be saved.
pub fn generate_connection_info(
    config: &LabConfig,
    secrets: &LabSecrets,
    file_name: &str,
) -> String {
    generate_connection_info_at(config, secrets, file_name, Utc::now())
}

/// Build the summary text with an explicit generation time.
///
/// Service URLs, SSH one-liners and container addresses are listed only
/// for enabled components.
pub fn generate_connection_info_at(
    config: &LabConfig,
    secrets: &LabSecrets,
    file_name: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let containers = &config.containers;
    let mut lines: Vec<String> = vec![
        String::new(),
        "==========================================".to_string(),
        "  APTL Local Lab Started Successfully!".to_string(),
        "==========================================".to_string(),
        String::new(),
    ];

    if containers.wazuh {
        lines.extend([
            "   Service URLs:".to_string(),
            "   Wazuh Dashboard: https://localhost:443".to_string(),
            "   Wazuh Indexer: https://localhost:9200".to_string(),
            "   Wazuh API: https://172.20.0.10:55000 (internal only)".to_string(),
            String::new(),
        ]);
    }

    lines.extend([
        "   Default Credentials:".to_string(),
        format!(
            "   Dashboard: {} / {}",
            secrets.indexer_username, secrets.indexer_password
        ),
        format!("   API: {} / {}", secrets.api_username, secrets.api_password),
        String::new(),
    ]);

    let ssh: Vec<&str> = [
        (
            containers.victim,
            "   Victim:          ssh -i ~/.ssh/aptl_lab_key labadmin@localhost -p 2022",
        ),
        (
            containers.kali,
            "   Kali:            ssh -i ~/.ssh/aptl_lab_key kali@localhost -p 2023",
        ),
        (
            containers.reverse,
            "   Reverse:         ssh -i ~/.ssh/aptl_lab_key labadmin@localhost -p 2027",
        ),
    ]
    .into_iter()
    .filter_map(|(enabled, line)| enabled.then_some(line))
    .collect();
    push_section(&mut lines, "   SSH Access:", &ssh);

    let mut ips: Vec<&str> = Vec::new();
    if containers.wazuh {
        ips.extend([
            "   wazuh.manager:   172.20.0.10",
            "   wazuh.dashboard: 172.20.0.11",
            "   wazuh.indexer:   172.20.0.12",
        ]);
    }
    if containers.victim {
        ips.push("   victim:          172.20.0.20");
    }
    if containers.kali {
        ips.push("   kali:            172.20.0.30");
    }
    if containers.reverse {
        ips.push("   reverse:         172.20.0.27");
    }
    push_section(&mut lines, "   Container IPs:", &ips);

    lines.extend([
        "   Status: Built and ready".to_string(),
        format!(
            "   Generated: {}",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        String::new(),
        "   Management Commands:".to_string(),
        "   View logs:    docker compose logs -f [service]".to_string(),
        "   Stop lab:     docker compose down".to_string(),
        "   Restart:      docker compose restart [service]".to_string(),
        "   Full cleanup: docker compose down -v".to_string(),
        String::new(),
        format!("   Connection info saved to: {file_name}"),
        String::new(),
    ]);

    lines.join("\n")
}

fn push_section(lines: &mut Vec<String>, heading: &str, body: &[&str]) {
    if body.is_empty() {
        return;
    }
    lines.push(heading.to_string());
    lines.extend(body.iter().map(|line| line.to_string()));
    lines.push(String::new());
}

/// Write the summary owner-readable only, creating parent directories.
pub fn write_connection_file(info: &str, path: &Path) -> Result<()> {
    write_atomic(path, info.as_bytes(), Some(CONNECTION_FILE_MODE))?;
    info!(path = %path.display(), "Connection info written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn secrets() -> LabSecrets {
        LabSecrets {
            indexer_username: "admin".to_string(),
            indexer_password: "SecretPassword".to_string(),
            api_username: "wazuh-wui".to_string(),
            api_password: "ApiPass".to_string(),
            dashboard_username: "kibanaserver".to_string(),
            dashboard_password: String::new(),
            wazuh_cluster_key: String::new(),
        }
    }

    #[test]
    fn test_default_config_lists_enabled_components() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let info = generate_connection_info_at(&LabConfig::default(), &secrets(), CONNECTION_FILE, at);

        assert!(info.contains("APTL Local Lab Started Successfully!"));
        assert!(info.contains("Wazuh Indexer: https://localhost:9200"));
        assert!(info.contains("Dashboard: admin / SecretPassword"));
        assert!(info.contains("API: wazuh-wui / ApiPass"));
        assert!(info.contains("labadmin@localhost -p 2022"));
        assert!(info.contains("kali@localhost -p 2023"));
        assert!(!info.contains("-p 2027"));
        assert!(info.contains("wazuh.indexer:   172.20.0.12"));
        assert!(!info.contains("172.20.0.27"));
        assert!(info.contains("Generated: 2026-01-02 03:04:05 UTC"));
        assert!(info.contains("Connection info saved to: lab_connections.txt"));
    }

    #[test]
    fn test_without_wazuh_or_ssh_hosts() {
        let mut config = LabConfig::default();
        config.containers.wazuh = false;
        config.containers.victim = false;
        config.containers.kali = false;

        let info = generate_connection_info(&config, &secrets(), CONNECTION_FILE);
        assert!(!info.contains("Service URLs:"));
        assert!(!info.contains("SSH Access:"));
        assert!(!info.contains("Container IPs:"));
        assert!(info.contains("Default Credentials:"));
        assert!(info.contains("Management Commands:"));
    }

    #[test]
    fn test_names_the_saved_file() {
        let info = generate_connection_info(&LabConfig::default(), &secrets(), "lab_info.txt");
        assert!(info.contains("Connection info saved to: lab_info.txt"));
        assert!(!info.contains(CONNECTION_FILE));
    }

    #[test]
    fn test_write_connection_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONNECTION_FILE);

        write_connection_file("hello\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
