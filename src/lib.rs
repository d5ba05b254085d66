pub mod codec;
pub mod config;
pub mod decode;
pub mod extract;
pub mod filter;
pub mod gram;
pub mod landmark;
pub mod movement;
pub mod normalize;
pub mod orient;
pub mod relaxed_face;
pub mod scale;
pub mod skeleton;

pub use config::{Config, PipelineConfig};
pub use gram::{Gram, GramLayout};
pub use landmark::MovementInput;
pub use movement::{JointTrack, Movement, TrackState};
pub use relaxed_face::RelaxedFace;
pub use scale::ScaleEstimator;
pub use skeleton::{Region, Skeleton};
