#[cfg(test)]
mod tests {
    use rein_config::ConfigLoader;
    use rein_config::schema::*;
    use std::io::Write;
    use std::time::Duration;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_transport_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_message_size_mb, 256);
        assert_eq!(config.max_message_size_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.attach_timeout(), Duration::from_secs(2));
        assert!(config.navigation_timeout(true) < config.navigation_timeout(false));
    }

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.idle_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.loop_window, 3);
        assert!(config.force_done_on_last_step);
    }

    #[test]
    fn test_replay_defaults() {
        let config = ReplayConfig::default();
        assert_eq!(config.max_retries, 3);
        assert!(!config.skip_failures);
        assert!(config.base_delay_ms <= config.max_delay_ms);
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = ReinConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = ReinConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: ReinConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.agent.max_steps, config.agent.max_steps);
        assert_eq!(restored.pool.idle_ttl_secs, config.pool.idle_ttl_secs);
        assert_eq!(restored.logging.level, config.logging.level);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[agent]
max_steps = 12

[replay]
skip_failures = true
"#;
        let config: ReinConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.max_steps, 12);
        assert!(config.replay.skip_failures);
        assert_eq!(config.agent.max_failures, 3);
        assert_eq!(config.session.attach_timeout_ms, 2_000);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_max_steps_is_error() {
        let mut config = ReinConfig::default();
        config.agent.max_steps = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("agent.max_steps"));
    }

    #[test]
    fn test_small_frame_ceiling_warns() {
        let mut config = ReinConfig::default();
        config.transport.max_message_size_mb = 1;
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "transport.max_message_size_mb")
        );
    }

    #[test]
    fn test_unknown_log_format_warns() {
        let mut config = ReinConfig::default();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rein.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[pool]\nidle_ttl_secs = 42").unwrap();

        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().pool.idle_ttl_secs, 42);
        assert_eq!(loader.path(), path.as_path());
    }

    #[test]
    fn test_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().pool.idle_ttl_secs, 300);
    }

    #[test]
    fn test_loader_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rein.toml");
        std::fs::write(&path, "[agent\nmax_steps = ").unwrap();
        assert!(ConfigLoader::load(Some(&path)).is_err());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rein.toml");
        std::fs::write(&path, "[replay]\nmax_retries = 1\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().replay.max_retries, 1);

        std::fs::write(&path, "[replay]\nmax_retries = 5\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().replay.max_retries, 5);
    }

    // ── Hot reload tests ───────────────────────────────────────

    fn wait_for(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        check()
    }

    #[test]
    fn test_watch_applies_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rein.toml");
        std::fs::write(&path, "[pool]\nidle_ttl_secs = 120\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        let _watcher = loader.watch().unwrap();

        std::fs::write(&path, "[pool]\nidle_ttl_secs = 240\n").unwrap();
        assert!(wait_for(|| loader.get().pool.idle_ttl_secs == 240));
    }

    #[test]
    fn test_watch_keeps_config_on_invalid_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rein.toml");
        std::fs::write(&path, "[pool]\nidle_ttl_secs = 120\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        let _watcher = loader.watch().unwrap();

        std::fs::write(&path, "[pool\nidle_ttl_secs = ").unwrap();
        std::fs::write(&path, "[transport]\nevent_buffer = 0\n").unwrap();
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(loader.get().pool.idle_ttl_secs, 120);
        assert_eq!(loader.get().transport.event_buffer, 1024);

        // The watcher is still live after rejecting both.
        std::fs::write(&path, "[pool]\nidle_ttl_secs = 60\n").unwrap();
        assert!(wait_for(|| loader.get().pool.idle_ttl_secs == 60));
    }
}
