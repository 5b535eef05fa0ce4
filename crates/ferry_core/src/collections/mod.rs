//! Containers shared between jobs within a frame.

mod deferred_array;
mod lane_stream;

pub use deferred_array::{
    AllocatorPolicy, ArrayOptions, DeferredArray, DeferredSlice, DeferredSliceMut, DeferredState,
    DeferredView,
};
pub use lane_stream::{LaneStream, LaneStreamWriter, LaneWriter};
