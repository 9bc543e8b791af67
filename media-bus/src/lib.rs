pub mod broadcast;
pub mod framing;
pub mod handshake;
pub mod pipeline;
pub mod protocol;
pub mod transcode;
pub mod types;

pub use broadcast::Broadcaster;
pub use framing::LineFramer;
pub use handshake::{ReadyInfo, await_ready};
pub use pipeline::{PipelineEvent, VideoPipeline};
pub use protocol::{ControlResponse, RESPONSE_PREFIX, StderrEvent};
pub use types::{
    EncodeConfig, PipelineConfig, PipelineConfigBuilder, RawInputConfig, SourceConfig,
    TranscoderConfig,
};
