// tests/config_load.rs
//
// Config discovery touches process-wide state (cwd, env), so every test here
// is serialized.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use pagewatch::config::{self, ENV_CONFIG_PATH};
use pagewatch::notify::ChannelConfig;

const TOML_BODY: &str = r#"
[[tasks]]
name = "from-toml"
url = "https://a.test"
frequency = "5m"
rule = "css:h1"
"#;

const JSON_BODY: &str = r#"{
  "tasks": [
    { "name": "from-json", "url": "https://b.test", "frequency": "1h", "rules": ["regex:v(\\d+)"] }
  ]
}"#;

/// Runs `f` with the cwd set to a fresh temp dir and `MONITOR_CONFIG` unset.
fn in_temp_cwd<T>(f: impl FnOnce(&Path) -> T) -> T {
    let dir = TempDir::new().unwrap();
    let old = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    std::env::remove_var(ENV_CONFIG_PATH);
    let out = f(dir.path());
    std::env::set_current_dir(old).unwrap();
    out
}

fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(&p, body).unwrap();
    p
}

#[test]
#[serial]
fn no_files_means_no_tasks() {
    in_temp_cwd(|_| {
        assert!(config::default_path().unwrap().is_none());
        let cfg = config::load_default().unwrap();
        assert!(cfg.tasks.is_empty());
    });
}

#[test]
#[serial]
fn toml_wins_over_json() {
    in_temp_cwd(|root| {
        write(root, "config/monitor.toml", TOML_BODY);
        write(root, "config/monitor.json", JSON_BODY);
        let cfg = config::load_default().unwrap();
        assert_eq!(cfg.tasks[0].name, "from-toml");
    });
}

#[test]
#[serial]
fn json_is_the_fallback() {
    in_temp_cwd(|root| {
        write(root, "config/monitor.json", JSON_BODY);
        let cfg = config::load_default().unwrap();
        assert_eq!(cfg.tasks[0].name, "from-json");
        assert_eq!(cfg.tasks[0].frequency.as_secs(), 3600);
    });
}

#[test]
#[serial]
fn env_path_takes_precedence() {
    in_temp_cwd(|root| {
        write(root, "config/monitor.toml", TOML_BODY);
        let custom = write(root, "elsewhere/mine.json", JSON_BODY);
        std::env::set_var(ENV_CONFIG_PATH, &custom);
        let cfg = config::load_default();
        std::env::remove_var(ENV_CONFIG_PATH);
        assert_eq!(cfg.unwrap().tasks[0].name, "from-json");
    });
}

#[test]
#[serial]
fn env_path_to_missing_file_is_an_error() {
    in_temp_cwd(|root| {
        write(root, "config/monitor.toml", TOML_BODY);
        std::env::set_var(ENV_CONFIG_PATH, root.join("nope.toml"));
        let res = config::load_default();
        std::env::remove_var(ENV_CONFIG_PATH);
        let err = res.unwrap_err();
        assert!(err.to_string().contains(ENV_CONFIG_PATH));
    });
}

#[test]
#[serial]
fn env_marked_secrets_are_resolved_at_load() {
    in_temp_cwd(|root| {
        let p = write(
            root,
            "monitor.toml",
            r#"
[default_notification]
channels = [
  { type = "telegram", bot_token = "ENV", chat_id = "42" },
  { type = "slack", webhook = "env" },
]

[[tasks]]
name = "a"
url = "https://a.test"
frequency = "1m"
rule = "css:h1"
"#,
        );
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("SLACK_WEBHOOK_URL", "https://hooks.slack.test/T/B/x");
        let cfg = config::load_from(&p);
        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        std::env::remove_var("SLACK_WEBHOOK_URL");

        let channels = cfg.unwrap().default_notification.channels;
        assert_eq!(
            channels[0],
            ChannelConfig::Telegram {
                bot_token: "123:abc".into(),
                chat_id: "42".into(),
                api_base: None,
            }
        );
        assert_eq!(
            channels[1],
            ChannelConfig::Slack {
                webhook: "https://hooks.slack.test/T/B/x".into(),
            }
        );
    });
}

#[test]
#[serial]
fn missing_env_secret_fails_the_load() {
    in_temp_cwd(|root| {
        std::env::remove_var("DISCORD_WEBHOOK_URL");
        let p = write(
            root,
            "monitor.toml",
            r#"
[[tasks]]
name = "a"
url = "https://a.test"
frequency = "1m"
rule = "css:h1"
notification = { channels = [{ type = "discord", webhook = "ENV" }] }
"#,
        );
        let err = config::load_from(&p).unwrap_err();
        assert!(format!("{err:#}").contains("DISCORD_WEBHOOK_URL"));
    });
}
