use std::env;
use std::str::FromStr;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::errors::ConfigError;
use crate::persona::{Persona, PersonaKind, PersonaRegistry};
use crate::utils::parse_duration_string;
use crate::yaml_config::YamlConfig;

/// Timeout applied to every request except the optimization calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout applied to optimization submit and poll calls.
pub const DEFAULT_VRP_TIMEOUT: Duration = Duration::from_secs(60);

/// Lower bound on the delay between two solution polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(330);

/// Settings of the optimization persona.
#[derive(Debug, Clone, PartialEq)]
pub struct VrpSettings {
    pub max_profiles: usize,
    pub max_locations: usize,
    pub profiles: Vec<String>,
    pub traffic_probability: f64,
    pub poll_interval: Duration,
    /// Optional ceiling on polls per job; `None` polls until a terminal state.
    pub max_polls: Option<u32>,
    pub timeout: Duration,
}

impl Default for VrpSettings {
    fn default() -> Self {
        Self {
            max_profiles: 1,
            max_locations: 10,
            profiles: vec!["car".to_string()],
            traffic_probability: 0.2,
            poll_interval: MIN_POLL_INTERVAL,
            max_polls: None,
            timeout: DEFAULT_VRP_TIMEOUT,
        }
    }
}

/// Main configuration for the load test.
///
/// Passed explicitly to the scheduler; nothing reads the environment after
/// this struct is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: Option<String>,
    pub query_points: Option<String>,
    pub query_points_num: usize,
    pub vrp: VrpSettings,
    pub users: usize,
    /// Virtual users started per second.
    pub spawn_rate: f64,
    pub test_duration: Duration,
    pub pacing_interval: Duration,
    pub request_timeout: Duration,
    pub personas: PersonaRegistry,
    pub skip_tls_verify: bool,
    pub seed: Option<u64>,
    pub debug_failures: bool,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Defaults for everything but the target.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            query_points: None,
            query_points_num: 3,
            vrp: VrpSettings::default(),
            users: 10,
            spawn_rate: 10.0,
            test_duration: Duration::from_secs(5 * 60),
            pacing_interval: Duration::from_secs(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            personas: PersonaRegistry::with_defaults(),
            skip_tls_verify: true,
            seed: None,
            debug_failures: false,
            metrics_port: None,
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("BASE_URL").map_err(|_| ConfigError::MissingField {
            field: "BASE_URL".to_string(),
        })?;

        let mut config = Self::new(base_url);
        config.apply_env_overrides()?;
        if env::var("SPAWN_RATE").is_err() {
            config.spawn_rate = config.users as f64;
        }
        config.validate()?;
        Ok(config)
    }

    /// Builds configuration from a YAML file, then applies environment overrides.
    ///
    /// Precedence: env > yaml > defaults.
    pub fn from_yaml_with_env_overrides(yaml: &YamlConfig) -> Result<Self, ConfigError> {
        let mut config = Self::new(yaml.base_url.clone());

        config.api_key = yaml.api_key.clone();
        config.query_points = yaml.query_points.clone();
        if let Some(n) = yaml.query_points_num {
            config.query_points_num = n;
        }
        if let Some(users) = yaml.users {
            config.users = users;
        }
        if let Some(ref d) = yaml.duration {
            config.test_duration = d.to_std_duration("duration")?;
        }
        if let Some(ref d) = yaml.pacing {
            config.pacing_interval = d.to_std_duration("pacing")?;
        }
        if let Some(skip) = yaml.skip_tls_verify {
            config.skip_tls_verify = skip;
        }
        config.seed = yaml.seed;
        config.debug_failures = yaml.debug.unwrap_or(false);
        config.metrics_port = yaml.metrics_port;

        if !yaml.personas.is_empty() {
            let mut registry = PersonaRegistry::new();
            for entry in &yaml.personas {
                let kind = PersonaKind::from_str(&entry.name)?;
                let weight = entry.weight.unwrap_or_else(|| kind.default_weight());
                registry.register(Persona::new(kind, weight))?;
            }
            config.personas = registry;
        }

        let vrp = &yaml.vrp;
        if let Some(n) = vrp.max_profiles {
            config.vrp.max_profiles = n;
        }
        if let Some(n) = vrp.max_locations {
            config.vrp.max_locations = n;
        }
        if let Some(ref profiles) = vrp.profiles {
            config.vrp.profiles = profiles.clone();
        }
        if let Some(p) = vrp.traffic_probability {
            config.vrp.traffic_probability = p;
        }
        if let Some(ref d) = vrp.poll_interval {
            config.vrp.poll_interval = d.to_std_duration("vrp.pollInterval")?;
        }
        config.vrp.max_polls = vrp.max_polls;

        config.apply_env_overrides()?;
        if env::var("SPAWN_RATE").is_err() {
            config.spawn_rate = yaml.spawn_rate.unwrap_or(config.users as f64);
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("BASE_URL") {
            self.base_url = url;
        }
        if let Ok(key) = env::var("API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(points) = env::var("QUERY_POINTS") {
            self.query_points = Some(points);
        }
        if let Some(n) = env_parse::<usize>("QUERY_POINTS_NUM")? {
            self.query_points_num = n;
        }
        if let Some(n) = env_parse::<usize>("VRP_MAX_PROFILES")? {
            self.vrp.max_profiles = n;
        }
        if let Some(n) = env_parse::<usize>("VRP_MAX_LOCATIONS")? {
            self.vrp.max_locations = n;
        }
        if let Ok(profiles) = env::var("VRP_PROFILES") {
            self.vrp.profiles = profiles
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(p) = env_parse::<f64>("VRP_TOMTOM_PROBABILITY")? {
            self.vrp.traffic_probability = p;
        }
        if let Some(d) = env_duration("VRP_POLL_INTERVAL")? {
            self.vrp.poll_interval = d;
        }
        if let Some(n) = env_parse::<u32>("VRP_MAX_POLLS")? {
            self.vrp.max_polls = Some(n);
        }
        if let Some(n) = env_parse::<usize>("NUM_USERS")? {
            self.users = n;
        }
        if let Some(rate) = env_parse::<f64>("SPAWN_RATE")? {
            self.spawn_rate = rate;
        }
        if let Some(d) = env_duration("TEST_DURATION")? {
            self.test_duration = d;
        }
        if let Some(d) = env_duration("PACING_INTERVAL")? {
            self.pacing_interval = d;
        }
        if let Ok(spec) = env::var("PERSONAS") {
            self.personas = PersonaRegistry::parse(&spec)?;
        }
        if let Some(skip) = env_bool("SKIP_TLS_VERIFY") {
            self.skip_tls_verify = skip;
        }
        if let Some(seed) = env_parse::<u64>("RANDOM_SEED")? {
            self.seed = Some(seed);
        }
        if let Ok(debug) = env::var("DEBUG") {
            self.debug_failures = debug == "yes";
        }
        if let Some(port) = env_parse::<u16>("METRICS_PORT")? {
            self.metrics_port = Some(port);
        }
        Ok(())
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "BASE_URL",
                &self.base_url,
                "must start with http:// or https://",
            ));
        }
        if self.users == 0 {
            return Err(ConfigError::invalid("NUM_USERS", self.users, "must be > 0"));
        }
        if !(self.spawn_rate.is_finite() && self.spawn_rate > 0.0) {
            return Err(ConfigError::invalid(
                "SPAWN_RATE",
                self.spawn_rate,
                "must be a positive number",
            ));
        }
        if self.query_points_num == 0 {
            return Err(ConfigError::invalid(
                "QUERY_POINTS_NUM",
                self.query_points_num,
                "must be > 0",
            ));
        }
        if self.vrp.profiles.is_empty() {
            return Err(ConfigError::invalid(
                "VRP_PROFILES",
                "",
                "at least one profile is required",
            ));
        }
        if !(0.0..=1.0).contains(&self.vrp.traffic_probability) {
            return Err(ConfigError::invalid(
                "VRP_TOMTOM_PROBABILITY",
                self.vrp.traffic_probability,
                "must be between 0 and 1",
            ));
        }
        if self.vrp.poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::invalid(
                "VRP_POLL_INTERVAL",
                format!("{:?}", self.vrp.poll_interval),
                "must be at least 330ms",
            ));
        }
        if self.vrp.max_polls == Some(0) {
            return Err(ConfigError::invalid("VRP_MAX_POLLS", 0, "must be > 0"));
        }
        self.personas.ensure_not_empty()
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            connect_timeout: self.request_timeout,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting load test:");
        println!("  Base URL: {}", self.base_url);
        println!(
            "  API Key: {}",
            if self.api_key.is_some() { "set" } else { "not set" }
        );
        println!("  Virtual Users: {}", self.users);
        println!("  Spawn Rate: {}/s", self.spawn_rate);
        println!("  Overall Test Duration: {:?}", self.test_duration);
        println!("  Pacing Interval: {:?}", self.pacing_interval);
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
        for (name, probability) in self.personas.probabilities() {
            println!("  Persona {:<14} {:>5.1}%", name, probability * 100.0);
        }
        match self.query_points {
            Some(ref q) => println!("  Points Query: {} (fixed)", q),
            None => println!(
                "  Points Query: {} x /info bounding box center",
                self.query_points_num
            ),
        }
        println!(
            "  VRP: {} profile(s), {} location(s), profiles {:?}, traffic probability {}",
            self.vrp.max_profiles,
            self.vrp.max_locations,
            self.vrp.profiles,
            self.vrp.traffic_probability
        );
        if let Some(seed) = self.seed {
            println!("  Random Seed: {}", seed);
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, raw, "not a valid number")),
        Err(_) => Ok(None),
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_duration_string(&raw)
            .map(Some)
            .map_err(|e| ConfigError::invalid(name, raw, e)),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "yes" | "1"))
}
