// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Generates tonic client/server stubs for the two Riffle services.
//!
//! The services are described here directly, so no `protoc` is needed. The
//! `.proto` files under `proto/` mirror these definitions for other languages.

use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "riffle.v1";
const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::wire::{input}"))
        .output_type(format!("crate::wire::{output}"))
        .codec_path(CODEC)
        .build()
}

fn main() {
    let source_dispatcher = Service::builder()
        .name("SourceDispatcher")
        .package(PACKAGE)
        .method(unary(
            "dispatch_single",
            "DispatchSingle",
            "SourceChangeEvent",
            "DispatchResponse",
        ))
        .method(unary(
            "dispatch_batch",
            "DispatchBatch",
            "EventBatch",
            "DispatchResponse",
        ))
        .build();

    let reaction_handler = Service::builder()
        .name("ReactionHandler")
        .package(PACKAGE)
        .method(unary(
            "handle_invocation",
            "HandleInvocation",
            "ReactionInvocation",
            "InvocationResponse",
        ))
        .build();

    Builder::new().compile(&[source_dispatcher, reaction_handler]);
    println!("cargo:rerun-if-changed=build.rs");
}
