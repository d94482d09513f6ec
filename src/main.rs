use std::time::Duration;

use iceoryx2::prelude::*;
use thiserror::Error;
use tracing::{info, warn};
use v4lout::frame::Frame;
use v4lout::{FrameSink, OptionsError, OutputOptions, SessionError, StreamState};

const SERVICE_NAME: &str = "camera/frames";

#[derive(Error, Debug)]
enum Error {
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("iceoryx2 error: {0}")]
    Ipc(String),
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("info,v4lout=debug")
        .init();

    let options = parse_args(std::env::args().skip(1))?;
    info!(
        vdev = %options.video_device.display(),
        fbdev = %options.display_device.display(),
        buffers = options.buffer_count,
        "Starting video output"
    );

    let session = v4lout::open(options)?;
    info!(mode = ?session.mode(), "Output device ready");
    let mut sink = FrameSink::new(session, SERVICE_NAME);

    let node = NodeBuilder::new()
        .create::<ipc::Service>()
        .map_err(|e| Error::Ipc(format!("{e:?}")))?;

    let service_name: ServiceName = SERVICE_NAME
        .try_into()
        .map_err(|e| Error::Ipc(format!("{e:?}")))?;
    let service = node
        .service_builder(&service_name)
        .publish_subscribe::<Frame>()
        .open_or_create()
        .map_err(|e| Error::Ipc(format!("{e:?}")))?;

    let subscriber = service
        .subscriber_builder()
        .create()
        .map_err(|e| Error::Ipc(format!("{e:?}")))?;

    info!(service = SERVICE_NAME, "IPC subscriber ready");

    while sink.session().state() != StreamState::Stopped {
        let sample = match subscriber.receive() {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            Err(e) => {
                warn!("Receive failed: {e:?}");
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
        };
        sink.show(&sample.payload().view())?;
    }
    Err(SessionError::InvalidState(StreamState::Stopped).into())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<OutputOptions, OptionsError> {
    let mut options = OutputOptions::default();
    while let Some(arg) = args.next() {
        let key = match arg.as_str() {
            "--vdev" => "vdev",
            "--fbdev" => "fbdev",
            "--left" => "l",
            "--top" => "t",
            "--width" => "w",
            "--height" => "h",
            "--buffers" => "buffers",
            "--output" => "output",
            "--overlay" => {
                options.set("overlay", None)?;
                continue;
            }
            "-o" => {
                let value = args
                    .next()
                    .ok_or_else(|| OptionsError::MissingValue(arg.clone()))?;
                options.apply_suboptions(&value)?;
                continue;
            }
            other => return Err(OptionsError::UnknownKey(other.to_string())),
        };
        options.set(key, args.next().as_deref())?;
    }
    Ok(options)
}
