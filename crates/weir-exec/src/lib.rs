pub mod archive;
pub mod collect;
pub mod job;
pub mod materialize;
pub mod params;
pub mod supervisor;

pub use collect::Collector;
pub use job::{render_script, JobRunner};
pub use materialize::{MaterializedSlot, Materializer, SlotValue, Workspace};
pub use params::{render_parameters, ParamMode, RenderedValue};
pub use supervisor::{JobOutcome, Supervisor, TerminateHandle};
