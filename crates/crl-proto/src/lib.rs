//! Generated message types and gRPC client stubs for the three services the
//! updater speaks to: the storage authority, the CA signer, and the
//! publisher. See `proto/crl.proto` for the wire definitions.

#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("crl");
