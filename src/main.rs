#[cfg(test)]
#[macro_use]
extern crate test_case;

use std::io as stdio;
use std::io::Write;
use std::thread;

use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info};

use crate::arg::{CliArg, Config};
use crate::dispatcher::{Dispatcher, Response};
use crate::endpoint::Endpoint;

mod arg;
mod dispatcher;
mod endpoint;
mod error;
mod io;
mod tls;
mod uri;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}:{} {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                thread::current().name().unwrap_or("main"),
                record.file().unwrap_or(""),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
    let cli_arg = CliArg::parse();

    let config = Config::resolve(cli_arg)?;
    let endpoint = Endpoint::parse(&config.endpoint)?;
    let dispatcher = Dispatcher::new(endpoint, &config.client_options())?;
    info!("start: {}", dispatcher.endpoint());

    let pending = dispatcher.send(&config.uri());
    debug!("request {} {:?}", pending.id(), pending.state());
    let request = pending.then(|response| report_status(&mut stdio::stdout().lock(), &response));
    let id = request.id();
    debug!("request {} {:?}", id, request.state());
    if let Err(err) = request.wait() {
        let kind = if err.is_transport() { "transport" } else { "request" };
        error!("request {} failed, {} error: {}", id, kind, err);
        return Err(err.into());
    }
    Ok(())
}

/// Writes the decimal status code, nothing else.
fn report_status(out: &mut impl Write, response: &Response) -> stdio::Result<()> {
    writeln!(out, "{}", response.status_code())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::runtime::Runtime;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::dispatcher::ClientOptions;
    use crate::uri::UriBuilder;

    fn printed_status(status: u16) -> Vec<u8> {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/search"))
                .and(query_param("q", "Bit Titan"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;
            server
        });

        let endpoint = Endpoint::parse(&format!("{}/", server.uri())).unwrap();
        let dispatcher = Dispatcher::new(endpoint, &ClientOptions::default()).unwrap();
        let out = Arc::new(Mutex::new(Vec::new()));

        let sink = out.clone();
        dispatcher
            .send(&UriBuilder::new("/search").append_query("q", "Bit Titan"))
            .then(move |response| report_status(&mut *sink.lock().unwrap(), &response))
            .wait()
            .unwrap();

        let printed = out.lock().unwrap().clone();
        printed
    }

    #[test_case(200 => b"200\n".to_vec(); "ok")]
    #[test_case(404 => b"404\n".to_vec(); "not found is still reported")]
    fn prints_only_the_status(status: u16) -> Vec<u8> {
        printed_status(status)
    }
}
