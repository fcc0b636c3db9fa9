// SPDX-License-Identifier: BSD-3-Clause

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use archon_driver::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    coordinator::{Coordinator, ExposureFlavor, ExposureParams},
    device::Device,
    external::{NullShutterActor, SimpleFitsSink},
};
use tracing::info;

struct Args {
    config_path: String,
    exposure_time_s: f64,
    flavor: ExposureFlavor,
}

fn parse_args() -> Result<Args> {
    let mut argv = std::env::args().skip(1);
    let config_path = argv.next().context("usage: archon-expose <config.yaml> <exposure_time_s> [flavor]")?;
    let exposure_time_s: f64 = argv
        .next()
        .context("missing exposure_time_s")?
        .parse()
        .context("exposure_time_s must be a number")?;
    let flavor = match argv.next().as_deref() {
        None | Some("object") => ExposureFlavor::Object,
        Some("bias") => ExposureFlavor::Bias,
        Some("dark") => ExposureFlavor::Dark,
        Some("flat") => ExposureFlavor::Flat,
        Some(other) => bail!("unknown exposure flavor {other:?}"),
    };
    Ok(Args {
        config_path,
        exposure_time_s,
        flavor,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let cfg = resolve_config_path(&args.config_path)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let _logger_guard = init_logger(&cfg.logging).context("failed to initialize logging")?;

    let connect_timeout = Duration::from_secs(cfg.network.connect_timeout_s);
    let mut devices = Vec::with_capacity(cfg.controllers.len());
    for (name, controller) in &cfg.controllers {
        let port = controller.port.unwrap_or(cfg.network.port);
        let endpoint: SocketAddr = format!("{}:{port}", controller.host)
            .parse()
            .with_context(|| format!("invalid endpoint for controller {name:?}"))?;
        let device = Device::connect(name.clone(), endpoint, connect_timeout, controller.ccds.clone())
            .await
            .with_context(|| format!("failed to connect to controller {name:?}"))?;
        info!(controller = %name, %endpoint, "connected");
        devices.push(Arc::new(device));
    }

    let coordinator = Coordinator::new(
        cfg.files.data_dir.clone(),
        cfg.files.template.clone(),
        cfg.observatory,
        cfg.timeouts.readout_max,
        Arc::new(NullShutterActor),
        Arc::new(SimpleFitsSink),
    );

    coordinator
        .expose(
            &devices,
            ExposureParams {
                flavor: args.flavor,
                exposure_time_s: args.exposure_time_s,
            },
        )
        .await
        .context("exposure failed")?;

    info!("exposure complete");
    Ok(())
}
