//! Behaviour tests for configuration layering.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use bobbin_config::Config;
use bobbin_protocol::WireFormat;
use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const DRAIN_ENV: &str = "BOBBIN_DRAIN_TIMEOUT_SECS";
const WIRE_FORMAT_ENV: &str = "BOBBIN_WIRE_FORMAT";

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_lock: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_lock = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let harness = Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("bobbin-worker")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_lock: env_lock,
        };
        // Start from a clean slate even if the caller's shell exports overrides.
        harness.clear_env(DRAIN_ENV);
        harness.clear_env(WIRE_FORMAT_ENV);
        harness
    }

    fn write_config(&self, contents: &str) {
        let path = self.temp_dir.path().join("bobbin.toml");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn remember(&self, key: &str) {
        let previous = std::env::var_os(key);
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn set_env(&self, key: &str, value: &str) {
        self.remember(key);
        // Environment mutation is `unsafe` in edition 2024; the harness holds
        // the global env lock and restores every override in `Drop`.
        unsafe { std::env::set_var(key, value) };
    }

    fn clear_env(&self, key: &str) {
        self.remember(key);
        unsafe { std::env::remove_var(key) };
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        self.loaded
            .borrow()
            .clone()
            .expect("configuration should have been loaded")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the drain timeout to {secs} seconds")]
fn given_config_file(harness: &Harness, secs: u64) {
    harness.write_config(&format!("drain_timeout_secs = {secs}\n"));
}

#[given("the environment sets the drain timeout to {secs} seconds")]
fn given_env_override(harness: &Harness, secs: u64) {
    harness.set_env(DRAIN_ENV, &secs.to_string());
}

#[given("the command line sets the drain timeout to {secs} seconds")]
fn given_cli_drain(harness: &Harness, secs: u64) {
    harness.push_cli_arg("--drain-timeout-secs");
    harness.push_cli_arg(secs.to_string());
}

#[given("the command line sets the log filter to {filter}")]
fn given_cli_filter(harness: &Harness, filter: String) {
    harness.push_cli_arg("--log-filter");
    harness.push_cli_arg(filter.trim_matches('"'));
}

#[given("the environment selects the {format} wire format")]
fn given_env_wire_format(harness: &Harness, format: String) {
    harness.set_env(WIRE_FORMAT_ENV, &format);
}

#[given("the command line selects the {format} wire format")]
fn given_cli_wire_format(harness: &Harness, format: String) {
    harness.push_cli_arg("--wire-format");
    harness.push_cli_arg(format);
}

#[when("the configuration is loaded")]
fn when_loaded(harness: &Harness) {
    harness.load();
}

#[then("the drain timeout is {secs} seconds")]
fn then_drain_timeout(harness: &Harness, secs: u64) {
    assert_eq!(harness.config().drain_timeout_secs, secs);
}

#[then("the log filter is {filter}")]
fn then_log_filter(harness: &Harness, filter: String) {
    assert_eq!(harness.config().log_filter(), filter.trim_matches('"'));
}

#[then("the wire format is {format}")]
fn then_wire_format(harness: &Harness, format: String) {
    let expected: WireFormat = format.parse().expect("known wire format");
    assert_eq!(harness.config().wire_format(), expected);
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
