//! Integration tests for kubehop

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Binary pointed at a scratch home for every path it touches
    fn kubehop(root: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("kubehop");
        cmd.env("KUBEHOP_CONFIG", root.join("config.toml"))
            .env("KUBEHOP_STATE_DIR", root.join("state"))
            .env("KUBEHOP_CACHE_DIR", root.join("cache"))
            .env("KUBEHOP_KUBECONFIG", root.join("kube/config"))
            .env("KUBEHOP_BACKUP_DIR", root.join("backups"))
            .env("INVENTORY_PATH", root.join("inventory"))
            .env("SSH_CONFIG_PATH", root.join("ssh_config"))
            .env_remove("KUBEHOP_LOG")
            .env_remove("CI");
        cmd
    }

    fn write_record(root: &Path, context: &str, pid: u32) {
        let dir = root.join("state/tunnels");
        std::fs::create_dir_all(&dir).unwrap();
        let record = serde_json::json!({
            "context": context,
            "pid": pid,
            "local_port": 21234,
            "remote_host": "10.0.0.5",
            "remote_port": 6443,
            "host_alias": "prod1",
            "created_at": "2026-01-01T00:00:00Z",
        });
        std::fs::write(dir.join(format!("{}.json", context)), record.to_string()).unwrap();
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("k3s kubeconfigs over SSH"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kubehop"));
    }

    #[test]
    fn config_path_follows_env() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[remote]"))
            .stdout(predicate::str::contains("/etc/rancher/k3s/k3s.yaml"));
    }

    #[test]
    fn config_show_applies_env() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .env("K3S_API_PORT", "7443")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("api_port = 7443"));
    }

    #[test]
    fn config_init_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path()).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        kubehop(temp.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn malformed_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[ports\nrange_start = ").unwrap();
        kubehop(temp.path())
            .args(["tunnels", "list"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn tunnels_list_empty() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["tunnels", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No tunnels recorded"));

        kubehop(temp.path())
            .args(["tunnels", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn dead_tunnel_is_listed_then_swept() {
        let temp = TempDir::new().unwrap();
        write_record(temp.path(), "acme-prod1", 2_000_000_000);

        kubehop(temp.path())
            .args(["tunnels", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"acme-prod1\""))
            .stdout(predicate::str::contains("\"alive\": false"));

        kubehop(temp.path())
            .args(["tunnels", "kill-all"])
            .assert()
            .success()
            .stdout(predicate::str::contains("acme-prod1 had already exited"));

        assert!(!temp.path().join("state/tunnels/acme-prod1.json").exists());
    }

    #[test]
    fn tunnels_kill_unknown_context() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["tunnels", "kill", "acme-prod1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No tunnel recorded for acme-prod1"));
    }

    #[test]
    fn tunnels_kill_rejects_bad_name() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["tunnels", "kill", "../etc"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid context name"));
    }

    #[test]
    fn cache_list_and_clear() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached kubeconfigs"));

        let cache = temp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("acme-prod1.yml"), "apiVersion: v1\n").unwrap();

        kubehop(temp.path())
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("acme-prod1"));

        kubehop(temp.path())
            .args(["cache", "clear", "acme-prod1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed cached kubeconfig for acme-prod1"));
        assert!(!cache.join("acme-prod1.yml").exists());
    }

    #[test]
    fn fetch_without_inventories_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("inventory")).unwrap();

        kubehop(temp.path())
            .arg("fetch")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No inventories found"))
            .stderr(predicate::str::contains("INVENTORY_PATH"));
    }

    #[test]
    fn bare_invocation_fetches() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No inventories found"));
    }

    #[test]
    fn fetch_without_terminal_needs_narrowing() {
        let temp = TempDir::new().unwrap();
        let inventory = temp.path().join("inventory");
        std::fs::create_dir_all(&inventory).unwrap();
        std::fs::write(
            inventory.join("acme_hosts.yml"),
            "all:\n  children:\n    k3s:\n      hosts:\n        prod1:\n        prod2:\n",
        )
        .unwrap();

        kubehop(temp.path())
            .arg("fetch")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--host"));

        kubehop(temp.path())
            .args(["fetch", "--host", "missing"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No host matches missing"));
    }

    #[test]
    fn fetch_empty_organization_has_no_hosts() {
        let temp = TempDir::new().unwrap();
        let inventory = temp.path().join("inventory");
        std::fs::create_dir_all(&inventory).unwrap();
        std::fs::write(inventory.join("acme_hosts.yml"), "all:\n  children: {}\n").unwrap();

        kubehop(temp.path())
            .arg("fetch")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No hosts found in acme inventory"));
    }

    #[test]
    fn completions_generate() {
        let temp = TempDir::new().unwrap();
        kubehop(temp.path())
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kubehop"));
    }
}
