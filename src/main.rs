use actix_web::{middleware, web, App, HttpServer};
use std::path::PathBuf;
use std::{env, process};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vitalimage::config::Settings;
use vitalimage::server::{self, AppState};

const USAGE: &str = "usage: ./vitalimage [config file]";

fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log)),
        )
        .init();

    let state = web::Data::new(AppState::new(&settings, settings.api_key()?)?);

    info!(
        "serving VitalImage on {}:{} with model endpoint {}",
        settings.host,
        settings.port,
        state.model.endpoint()
    );

    HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(middleware::Logger::default())
            .configure(|cfg| server::configure(cfg, state))
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await?;

    Ok(())
}
