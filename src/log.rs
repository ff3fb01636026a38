//! Internal logging for the simulation engine.
//!
//! This module (re)exports the five logging macros: `error!`, `warn!`,
//! `info!`, `debug!` and `trace!`, where `error!` represents the
//! highest-priority messages and `trace!` the lowest. Logging is not to
//! be confused with _reporting_: reports record model output, log
//! messages describe engine behavior.
//!
//! Logging is disabled by default and can be controlled
//! programmatically:
//!
//!  - `enable_logging()`: turns on all log messages
//!  - `disable_logging()`: turns off all log messages
//!  - `set_log_level(level)`: enables messages with priority at least
//!    `level`
//!
//! Per-module filters can be installed with `set_module_filter()` /
//! `set_module_filters()` and removed with `remove_module_filter()`.

pub use log::{debug, error, info, trace, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{runtime::ConfigBuilder, Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    Config, Handle,
};
use std::collections::hash_map::Entry;
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::hash::HashMap;

// Logging disabled unless an embedder asks for it.
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;
const DEFAULT_LOG_PATTERN: &str = "{l} [{M}] {m}{n}";

/// A global instance of the logging configuration.
static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// Different level filters can apply to messages emitted from different
/// modules according to the module path (e.g. `"contagion::epidemic"`).
#[derive(Debug, PartialEq)]
struct ModuleLogConfiguration {
    module: String,
    level: LevelFilter,
}

impl From<(&str, LevelFilter)> for ModuleLogConfiguration {
    fn from((module, level): (&str, LevelFilter)) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

impl From<&ModuleLogConfiguration> for Logger {
    fn from(module_config: &ModuleLogConfiguration) -> Self {
        Logger::builder().build(module_config.module.clone(), module_config.level)
    }
}

/// Holds logging configuration: the filter levels of modules and a
/// handle to the global logger. Because loggers are globally installed,
/// only one instance of this struct exists; the public API are free
/// functions which lock the singleton.
#[derive(Debug, Default)]
struct LogConfiguration {
    /// The default level filter for modules without an explicit filter.
    /// `LevelFilter::Off` disables logging.
    global_log_level: Option<LevelFilter>,
    module_configurations: HashMap<String, ModuleLogConfiguration>,
    /// Handle to the `log4rs` logger.
    root_handle: Option<Handle>,
}

impl LogConfiguration {
    fn effective_level(&self) -> LevelFilter {
        self.global_log_level.unwrap_or(DEFAULT_LOG_LEVEL)
    }

    fn set_log_level(&mut self, level: LevelFilter) {
        self.global_log_level = Some(level);
        self.set_config();
    }

    /// Returns true if the configuration was mutated.
    fn insert_module_filter(&mut self, module: &String, level: LevelFilter) -> bool {
        match self.module_configurations.entry(module.clone()) {
            Entry::Occupied(mut entry) => {
                let module_config = entry.get_mut();
                if module_config.level == level {
                    return false;
                }
                module_config.level = level;
            }
            Entry::Vacant(entry) => {
                entry.insert(ModuleLogConfiguration {
                    module: module.to_string(),
                    level,
                });
            }
        }
        true
    }

    fn set_module_filter<S: ToString>(&mut self, module: &S, level: LevelFilter) {
        if self.insert_module_filter(&module.to_string(), level) {
            self.set_config();
        }
    }

    fn set_module_filters<S: ToString>(&mut self, module_filters: &[(&S, LevelFilter)]) {
        let mut mutated: bool = false;
        for (module, level) in module_filters {
            mutated |= self.insert_module_filter(&module.to_string(), *level);
        }
        if mutated {
            self.set_config();
        }
    }

    fn remove_module_filter(&mut self, module: &str) {
        if self.module_configurations.remove(module).is_some() {
            self.set_config();
        }
    }

    /// Sets the global logger to conform to this `LogConfiguration`.
    fn set_config(&mut self) {
        let stdout: ConsoleAppender = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(DEFAULT_LOG_PATTERN)))
            .build();
        let mut config: ConfigBuilder =
            Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));

        for module_config in self.module_configurations.values() {
            config = config.logger(module_config.into());
        }

        // The `Root` determines the global log level.
        let root = Root::builder()
            .appender("stdout")
            .build(self.effective_level());
        let new_config = match config.build(root) {
            Err(e) => {
                panic!("failed to build log config: {e}");
            }
            Ok(config) => config,
        };

        match self.root_handle {
            Some(ref mut handle) => {
                handle.set_config(new_config);
            }
            None => {
                self.root_handle = Some(log4rs::init_config(new_config).unwrap());
            }
        }
    }
}

// The public API

/// Enables the logger with no global level filter / full logging.
pub fn enable_logging() {
    set_log_level(LevelFilter::Trace);
}

/// Disables logging completely.
pub fn disable_logging() {
    set_log_level(LevelFilter::Off);
}

/// Sets the global log level. `LevelFilter::Off` disables logging.
pub fn set_log_level(level: LevelFilter) {
    let mut log_configuration = get_log_configuration();
    log_configuration.set_log_level(level);
}

/// Sets a level filter for the given module path.
pub fn set_module_filter(module_path: &str, level_filter: LevelFilter) {
    let mut log_configuration = get_log_configuration();
    log_configuration.set_module_filter(&module_path, level_filter);
}

/// Removes a module-specific level filter for the given module path.
pub fn remove_module_filter(module_path: &str) {
    let mut log_configuration = get_log_configuration();
    log_configuration.remove_module_filter(module_path);
}

/// Sets level filters for a set of modules in bulk.
#[allow(clippy::implicit_hasher)]
pub fn set_module_filters<S: ToString>(module_filters: &[(&S, LevelFilter)]) {
    let mut log_configuration = get_log_configuration();
    log_configuration.set_module_filters(module_filters);
}

fn get_log_configuration() -> MutexGuard<'static, LogConfiguration> {
    LOG_CONFIGURATION.lock().expect("Mutex poisoned")
}
