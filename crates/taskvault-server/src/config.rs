use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{ArgAction, Args};
use taskvault_core::policy::DEFAULT_MAX_UPLOAD_BYTES;
use taskvault_core::UploadPolicy;
use taskvault_upload::transform::DEFAULT_MAX_WIDTH;
use taskvault_upload::{ImageTransform, UploadConfig, DEFAULT_CHANNEL_CAPACITY};

/// Settings for the HTTP server, from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    /// Address to bind
    #[arg(long, env = "TASKVAULT_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "TASKVAULT_PORT", default_value = "3710")]
    pub port: u16,

    /// Externally reachable base URL, used in locally signed blob links.
    /// Derived from bind and port when unset.
    #[arg(long, env = "TASKVAULT_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Largest accepted attachment, in bytes received
    #[arg(long, env = "TASKVAULT_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Downscale and re-encode uploaded images as WebP
    #[arg(long, env = "TASKVAULT_TRANSFORM_IMAGES", default_value_t = true, action = ArgAction::Set)]
    pub transform_images: bool,

    /// Maximum width of transformed images
    #[arg(long, env = "TASKVAULT_TRANSFORM_MAX_WIDTH", default_value_t = DEFAULT_MAX_WIDTH)]
    pub transform_max_width: u32,

    /// Lifetime of presigned links (seconds)
    #[arg(long, env = "TASKVAULT_PRESIGN_TTL_SECS", default_value = "300")]
    pub presign_ttl_secs: u64,

    /// How long a rejected upload may wait for the store to discard its partial write (seconds)
    #[arg(long, env = "TASKVAULT_SETTLE_TIMEOUT_SECS", default_value = "30")]
    pub settle_timeout_secs: u64,
}

impl ServeConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn public_url(&self) -> String {
        if let Some(ref url) = self.public_url {
            return url.trim_end_matches('/').to_string();
        }
        let host = if self.bind.is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            match self.bind {
                IpAddr::V4(ip) => ip.to_string(),
                IpAddr::V6(ip) => format!("[{ip}]"),
            }
        };
        format!("http://{host}:{}", self.port)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            policy: UploadPolicy::default().with_max_upload_bytes(self.max_upload_bytes),
            transform: self.transform_images.then(|| ImageTransform {
                max_width: self.transform_max_width,
            }),
            settle_timeout: Duration::from_secs(self.settle_timeout_secs),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
