// SPDX-License-Identifier: BSD-3-Clause

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinSet;

use crate::{
    cfg::config::Observatory,
    coordinator::{counter::ExposureCounter, template::TemplateFields},
    device::{ControllerStatus, Device},
    error::CoreError,
    external::{parse_shutter_status, FitsSink, ShutterActor, ShutterReply},
};

const MJD_UNIX_EPOCH_OFFSET: f64 = 40587.0;

/// The semantic class of an exposure (§9 design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureFlavor {
    Bias,
    Dark,
    Flat,
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct ExposureParams {
    pub flavor: ExposureFlavor,
    pub exposure_time_s: f64,
}

/// Orchestrates exposures across one or more devices in lockstep (§4.7).
pub struct Coordinator {
    data_dir: PathBuf,
    template: String,
    observatory: Observatory,
    readout_max: Duration,
    shutter: Arc<dyn ShutterActor>,
    fits: Arc<dyn FitsSink>,
    exposing: AtomicBool,
}

impl Coordinator {
    pub fn new(
        data_dir: PathBuf,
        template: String,
        observatory: Observatory,
        readout_max: Duration,
        shutter: Arc<dyn ShutterActor>,
        fits: Arc<dyn FitsSink>,
    ) -> Self {
        Self {
            data_dir,
            template,
            observatory,
            readout_max,
            shutter,
            fits,
            exposing: AtomicBool::new(false),
        }
    }

    /// Runs one batch exposure across `devices`. Fails the whole batch (and
    /// cancels any siblings still running) if any device's exposure fails.
    pub async fn expose(&self, devices: &[Arc<Device>], mut params: ExposureParams) -> Result<(), CoreError> {
        for device in devices {
            if !device.is_connected() {
                return Err(CoreError::BadState {
                    expected: "connected".to_string(),
                    found: format!("{} is disconnected", device.name),
                });
            }
        }

        if self
            .exposing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::Busy);
        }

        let result = self.expose_locked(devices, &mut params).await;
        self.exposing.store(false, Ordering::SeqCst);
        result
    }

    async fn expose_locked(&self, devices: &[Arc<Device>], params: &mut ExposureParams) -> Result<(), CoreError> {
        if params.flavor == ExposureFlavor::Bias {
            params.exposure_time_s = 0.0;
        } else if !(params.exposure_time_s.is_finite() && params.exposure_time_s > 0.0) {
            return Err(CoreError::BadArg("exposure_time_s must be positive and finite".to_string()));
        }

        let mjd = current_mjd_floor();
        let mjd_dir = self.data_dir.join(mjd.to_string());
        std::fs::create_dir_all(&mjd_dir)?;

        let mut counter = ExposureCounter::open(&self.data_dir)?;
        let exposure_no = counter.read()?;

        let mut tasks = JoinSet::new();
        for device in devices {
            tasks.spawn(run_single_device_exposure(
                device.clone(),
                self.shutter.clone(),
                self.fits.clone(),
                *params,
                exposure_no,
                mjd_dir.clone(),
                self.observatory,
                self.template.clone(),
                self.readout_max,
            ));
        }

        let mut failure: Option<CoreError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "device exposure failed, cancelling siblings");
                    failure.get_or_insert(e);
                    tasks.abort_all();
                },
                Err(join_err) if join_err.is_cancelled() => {},
                Err(join_err) => {
                    failure.get_or_insert(CoreError::BadArg(format!("exposure task panicked: {join_err}")));
                    tasks.abort_all();
                },
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        counter.write(exposure_no + 1)?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_single_device_exposure(
    device: Arc<Device>,
    shutter: Arc<dyn ShutterActor>,
    fits: Arc<dyn FitsSink>,
    params: ExposureParams,
    exposure_no: u64,
    mjd_dir: PathBuf,
    observatory: Observatory,
    template: String,
    readout_max: Duration,
) -> Result<(), CoreError> {
    let fields = TemplateFields {
        exposure_no,
        controller: &device.name,
        observatory,
    };
    let path = mjd_dir.join(fields.expand(&template));

    validate_shutter_reply(shutter.open().await)?;
    device.integrate(params.exposure_time_s).await?;
    tokio::time::sleep(Duration::from_secs_f64(params.exposure_time_s)).await;
    validate_shutter_reply(shutter.close().await)?;

    device.status.set(ControllerStatus::READING);
    let wbuf = device.poll_readout(readout_max).await?;

    device.reset().await?;
    let frame = device.fetch(wbuf as i32).await?;

    for (name, region) in &device.ccds {
        let slice = frame.region(region.x0, region.y0, region.x1, region.y1);
        fits.write_extension(&path, name, &slice).await?;
    }

    Ok(())
}

/// Applies the handshake rule in §4.7.1 step 2/5: a transport-level `Err`
/// from the actor becomes `ShutterFailed`, and a reply whose status isn't
/// `"open"`/`"closed"` becomes `ShutterUnknown` (via [`parse_shutter_status`]).
fn validate_shutter_reply(reply: Result<ShutterReply, CoreError>) -> Result<(), CoreError> {
    let reply = reply.map_err(|e| CoreError::ShutterFailed(e.to_string()))?;
    parse_shutter_status(&reply.status)?;
    Ok(())
}

fn current_mjd_floor() -> i64 {
    let unix_seconds = chrono::Utc::now().timestamp() as f64;
    (unix_seconds / 86400.0 + MJD_UNIX_EPOCH_OFFSET).floor() as i64
}
