use std::env;

use anyhow::Context;
use loctag_kit::clients::gemini::DEFAULT_CHAT_MODEL;
use loctag_kit::protocol::LatLng;

mod app;

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));

    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let api_key = env::var("GEMINI_API_KEY")
        .or_else(|_| env::var("API_KEY"))
        .context("Set GEMINI_API_KEY (or API_KEY) to your API key")?;

    let model = env::var("MODEL_ID").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

    // Missing or malformed coordinates are not fatal; answers just get less
    // precise about proximity.
    let location = match env::var("LOCATION") {
        Ok(raw) => {
            let location = parse_location(&raw);
            if location.is_none() {
                log::warn!("Ignoring LOCATION={raw:?}, expected \"lat,lng\"");
            }
            location
        }
        Err(_) => {
            log::info!("No LOCATION configured");
            None
        }
    };

    app::run(app::Config {
        api_key,
        model,
        location,
    })
}

fn parse_location(raw: &str) -> Option<LatLng> {
    let (lat, lng) = raw.split_once(',')?;

    Some(LatLng {
        latitude: lat.trim().parse().ok()?,
        longitude: lng.trim().parse().ok()?,
    })
}
