#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use relay_common::*;
pub use relay_egress::{
    install, install_with, restore, Backpressure, Device, Discipline, DisciplineStats,
    EgressError, EgressOptions, NoopUpstream, NotifyUpstream, Passthrough, Upstream, Verdict,
};
pub use relay_forward::*;
pub use relay_policy as policy;
pub use relay_policy::{PolicyError, PolicyParam, PolicyRegistry, PolicySet};

pub use bytes::Bytes;
