use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::dispatcher::ClientOptions;
use crate::error::Error;
use crate::uri::UriBuilder;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArg {
    /// base endpoint
    ///
    /// http://host[:port]/, https://host/ or unix:///path/to.sock
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// request path
    ///
    /// 相对路径, 已转义
    #[arg(short, long)]
    pub path: Option<String>,

    /// query parameter, KEY=VALUE, repeatable
    ///
    /// 按出现顺序追加
    #[arg(short, long = "query", value_parser = parse_query_param)]
    pub query: Vec<QueryParam>,

    /// PEM bundle of trusted CA certificates
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// runtime worker threads
    #[arg(long)]
    pub worker_threads: Option<usize>,

    /// config file
    ///
    /// yaml config file
    #[arg(short, long, default_value = None)]
    pub config: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub path: String,
    pub query: Vec<QueryParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: "http://www.bing.com/".to_string(),
            path: "/search".to_string(),
            query: vec![QueryParam {
                key: "q".to_string(),
                value: "BitTitan".to_string(),
            }],
            ca_file: None,
            user_agent: None,
            worker_threads: ClientOptions::default().worker_threads,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let reader = File::open(path)
            .map(BufReader::new)
            .map_err(|source| Error::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_reader(reader).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File values first, then command line overrides.
    pub fn resolve(cli_arg: CliArg) -> Result<Config, Error> {
        let mut config = match cli_arg.config.as_deref() {
            Some(path) => Config::load(Path::new(path))?,
            None => Config::default(),
        };

        if let Some(endpoint) = cli_arg.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(path) = cli_arg.path {
            config.path = path;
        }
        if !cli_arg.query.is_empty() {
            config.query = cli_arg.query;
        }
        if cli_arg.ca_file.is_some() {
            config.ca_file = cli_arg.ca_file;
        }
        if cli_arg.user_agent.is_some() {
            config.user_agent = cli_arg.user_agent;
        }
        if let Some(threads) = cli_arg.worker_threads {
            config.worker_threads = threads;
        }
        Ok(config)
    }

    pub fn uri(&self) -> UriBuilder {
        self.query
            .iter()
            .fold(UriBuilder::new(self.path.as_str()), |builder, param| {
                builder.append_query(param.key.as_str(), param.value.as_str())
            })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            worker_threads: self.worker_threads,
            ca_file: self.ca_file.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn parse_query_param(raw: &str) -> Result<QueryParam, String> {
    match raw.split_once('=') {
        Some((key, value)) => Ok(QueryParam {
            key: key.to_string(),
            value: value.to_string(),
        }),
        None => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}
