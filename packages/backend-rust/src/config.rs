use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use teki_bkt::BktParams;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub database_url: String,
    pub bkt: BktParams,
    pub mastery_threshold: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://techguro.db?mode=rwc".to_string());

        let defaults = BktParams::default();
        let bkt = BktParams {
            p_init: env_f64("BKT_P_INIT").unwrap_or(defaults.p_init),
            p_transit: env_f64("BKT_P_TRANSIT").unwrap_or(defaults.p_transit),
            p_slip: env_f64("BKT_P_SLIP").unwrap_or(defaults.p_slip),
            p_guess: env_f64("BKT_P_GUESS").unwrap_or(defaults.p_guess),
        };

        let mastery_threshold =
            env_f64("MASTERY_THRESHOLD").unwrap_or(teki_bkt::MASTERY_THRESHOLD);

        Self {
            host,
            port,
            log_level,
            database_url,
            bkt,
            mastery_threshold,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse::<f64>().ok()
}
