use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use sfu_transport::config::Config;
use sfu_transport::{build_transport_settings, resolve_external_ips, IpFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON server configuration, defaults apply when omitted.
    /// example: --config sfu.json
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// External IP of this node, used as the NAT hint
    #[arg(short, long)]
    external_ip: Option<IpAddr>,
    /// Only run the NAT 1:1 discovery
    #[arg(short, long)]
    discover_only: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let Args {
        config,
        external_ip,
        discover_only,
    } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let config = match config {
        Some(path) => serde_json::from_slice::<Config>(&std::fs::read(path)?)?,
        None => Config::default(),
    };

    if discover_only {
        let ips = &config.rtc.ips;
        let ip_filter = IpFilter::new(ips.includes.as_slice(), ips.excludes.as_slice())?;
        match resolve_external_ips(&config.rtc, Some(&ip_filter)).await? {
            Some(mapping) => {
                for ip_mapping in mapping.iter() {
                    println!("{ip_mapping}");
                }
            }
            None => println!("no local ip to map"),
        }
        return Ok(());
    }

    let settings = build_transport_settings(&config, external_ip).await?;
    println!("nat 1:1 ips: {:?}", settings.setting_engine.nat_1to1_ips());
    let network_types: Vec<String> = settings
        .setting_engine
        .network_types()
        .iter()
        .map(|t| t.to_string())
        .collect();
    println!("network types: {}", network_types.join(","));
    for server in &settings.configuration.ice_servers {
        println!("ice server: {}", server.urls.join(" "));
    }
    if let Some(mux) = &settings.udp_mux {
        println!("udp mux: {:?}", mux.local_addrs());
    }
    if let Some(listener) = &settings.tcp_listener {
        println!("tcp listener: {}", listener.local_addr()?);
    }
    log::info!("exit");
    Ok(())
}
