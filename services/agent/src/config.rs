//! Agent configuration, loaded from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use armada_resources::Resources;

pub const DEFAULT_RESOURCES: &str = "cpus:1;mem:1024";

#[derive(Debug, Clone)]
pub struct Config {
    /// Total consumable resources advertised to the master.
    pub resources: Resources,

    /// Free-form machine attributes advertised to the master.
    pub attributes: String,

    /// Where framework work directories are placed.
    pub work_dir: PathBuf,

    /// Where to find Hadoop, for executors fetched from HDFS.
    pub hadoop_home: Option<String>,

    /// Run tasks as the submitting user rather than the agent's user.
    pub switch_user: bool,

    /// Directory prepended to relative executor paths.
    pub frameworks_home: Option<PathBuf>,

    /// Static master endpoint, used when no discovery URL is configured.
    pub master_url: Option<String>,

    /// Leader-election endpoint polled for the current master.
    pub master_discovery_url: Option<String>,

    /// Address the agent's HTTP endpoint binds to.
    pub listen_addr: SocketAddr,

    /// Overrides the advertised public hostname (useful on cloud hosts whose
    /// public DNS name differs from their hostname).
    pub public_dns: Option<String>,

    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let resources = std::env::var("ARMADA_RESOURCES")
            .unwrap_or_else(|_| DEFAULT_RESOURCES.to_string())
            .parse()
            .context("parsing ARMADA_RESOURCES")?;

        let attributes = std::env::var("ARMADA_ATTRIBUTES").unwrap_or_default();

        let work_dir = std::env::var("ARMADA_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_work_dir());

        let hadoop_home = std::env::var("ARMADA_HADOOP_HOME")
            .ok()
            .or_else(|| std::env::var("HADOOP_HOME").ok());

        let switch_user = std::env::var("ARMADA_SWITCH_USER")
            .ok()
            .map(|value| value.parse().context("parsing ARMADA_SWITCH_USER"))
            .transpose()?
            .unwrap_or(true);

        let frameworks_home = std::env::var("ARMADA_FRAMEWORKS_HOME").ok().map(PathBuf::from);

        let master_url = std::env::var("ARMADA_MASTER_URL").ok();
        let master_discovery_url = std::env::var("ARMADA_MASTER_DISCOVERY_URL").ok();

        let listen_addr = std::env::var("ARMADA_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5051".to_string())
            .parse()
            .context("parsing ARMADA_LISTEN_ADDR")?;

        let public_dns = std::env::var("ARMADA_PUBLIC_DNS").ok();

        let log_level = std::env::var("ARMADA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            resources,
            attributes,
            work_dir,
            hadoop_home,
            switch_user,
            frameworks_home,
            master_url,
            master_discovery_url,
            listen_addr,
            public_dns,
            log_level,
        })
    }

    /// Key/value pairs for the `/vars` endpoint.
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("resources".to_string(), self.resources.to_string()),
            ("attributes".to_string(), self.attributes.clone()),
            (
                "work_dir".to_string(),
                self.work_dir.display().to_string(),
            ),
            ("switch_user".to_string(), self.switch_user.to_string()),
        ];

        if let Some(hadoop_home) = &self.hadoop_home {
            vars.push(("hadoop_home".to_string(), hadoop_home.clone()));
        }
        if let Some(frameworks_home) = &self.frameworks_home {
            vars.push((
                "frameworks_home".to_string(),
                frameworks_home.display().to_string(),
            ));
        }
        if let Some(master_url) = &self.master_url {
            vars.push(("master_url".to_string(), master_url.clone()));
        }

        vars
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resources: DEFAULT_RESOURCES.parse().expect("default resources parse"),
            attributes: String::new(),
            work_dir: default_work_dir(),
            hadoop_home: None,
            switch_user: true,
            frameworks_home: None,
            master_url: None,
            master_discovery_url: None,
            listen_addr: "127.0.0.1:5051".parse().expect("default listen addr"),
            public_dns: None,
            log_level: "info".to_string(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("work")
}
