pub mod docker;
pub mod memory;
pub mod runtime;

pub use docker::DockerRuntime;
pub use memory::{MemoryRuntime, Op};
pub use runtime::{
    ByteStream, ContainerInfo, ContainerRuntime, ContainerSpec, EventStream, ImageInfo,
    NetworkAttachment, PortMapping, collect_bytes, receiver_stream,
};
