//! Rustler NIFs for kvlink.
//!
//! Elixir/Erlang processes share one process-wide registry of stores,
//! addressed by integer instance id. Every NIF that takes the registry lock
//! runs on a dirty I/O scheduler, since the lock is held for whole disk
//! operations.
//!
//! # Usage in Elixir
//!
//! ```elixir
//! defmodule Kvlink.Native do
//!   use Rustler, otp_app: :kvlink, crate: "kvlink_rustler"
//!
//!   def version(), do: :erlang.nif_error(:nif_not_loaded)
//!   def allocate(_id), do: :erlang.nif_error(:nif_not_loaded)
//!   def open(_id, _path, _truncate), do: :erlang.nif_error(:nif_not_loaded)
//!   def get(_id, _key), do: :erlang.nif_error(:nif_not_loaded)
//!   # ...
//! end
//! ```
//!
//! Failures come back as `{:error, {code, message}}` where `code` is the
//! stable snake_case error code, e.g. `"no_such_instance"`.

use kvlink::{Call, KvError, Reply, SharedRegistry};
use rustler::{Atom, NifResult, NifStruct};
use std::path::PathBuf;
use std::sync::LazyLock;

mod atoms {
    rustler::atoms! {
        ok,
    }
}

static REGISTRY: LazyLock<SharedRegistry> = LazyLock::new(SharedRegistry::new);

// ============================================================================
// NIF Structs
// ============================================================================

/// Result of a lookup as an Elixir struct.
#[derive(Debug, PartialEq, Eq, NifStruct)]
#[module = "Kvlink.Lookup"]
pub struct ElixirLookup {
    pub found: bool,
    pub value: String,
}

// ============================================================================
// Pure Logic (testable without NIF runtime)
// ============================================================================

fn version_impl() -> String {
    kvlink::version().to_string()
}

fn to_nif_error(err: KvError) -> rustler::Error {
    rustler::Error::Term(Box::new((err.code().to_string(), err.to_string())))
}

fn unit(reply: kvlink::Result<Reply>) -> kvlink::Result<()> {
    reply.map(|_| ())
}

fn flag(reply: kvlink::Result<Reply>) -> kvlink::Result<bool> {
    match reply? {
        Reply::Flag(flag) => Ok(flag),
        other => Err(unexpected(other)),
    }
}

fn count(reply: kvlink::Result<Reply>) -> kvlink::Result<u64> {
    match reply? {
        Reply::Count(count) => Ok(count),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> KvError {
    KvError::invalid_arguments("reply", format!("unexpected reply {:?}", reply))
}

fn allocate_impl(registry: &SharedRegistry, id: i64) -> kvlink::Result<()> {
    unit(registry.call(Call::Allocate { id }))
}

fn release_impl(registry: &SharedRegistry, id: i64) -> kvlink::Result<()> {
    unit(registry.call(Call::Release { id }))
}

fn open_impl(registry: &SharedRegistry, id: i64, path: String, truncate: bool) -> kvlink::Result<()> {
    unit(registry.call(Call::Open {
        id,
        path: PathBuf::from(path),
        truncate,
    }))
}

fn open_read_only_impl(registry: &SharedRegistry, id: i64, path: String) -> kvlink::Result<()> {
    unit(registry.call(Call::OpenReadOnly {
        id,
        path: PathBuf::from(path),
    }))
}

fn close_impl(registry: &SharedRegistry, id: i64) -> kvlink::Result<()> {
    unit(registry.call(Call::Close { id }))
}

fn get_impl(registry: &SharedRegistry, id: i64, key: String) -> kvlink::Result<ElixirLookup> {
    match registry.call(Call::Get { id, key })? {
        Reply::Lookup { found, value } => Ok(ElixirLookup { found, value }),
        other => Err(unexpected(other)),
    }
}

fn check_impl(registry: &SharedRegistry, id: i64, key: String) -> kvlink::Result<bool> {
    flag(registry.call(Call::Check { id, key }))
}

fn set_impl(
    registry: &SharedRegistry,
    id: i64,
    key: String,
    value: String,
    overwrite: bool,
) -> kvlink::Result<bool> {
    flag(registry.call(Call::Set {
        id,
        key,
        value,
        overwrite,
    }))
}

fn size_impl(registry: &SharedRegistry, id: i64) -> kvlink::Result<u64> {
    count(registry.call(Call::Size { id }))
}

fn key_dump_impl(registry: &SharedRegistry, id: i64, destination: String) -> kvlink::Result<u64> {
    count(registry.call(Call::KeyDump {
        id,
        destination: PathBuf::from(destination),
    }))
}

fn last_error_impl(registry: &SharedRegistry, id: i64) -> kvlink::Result<String> {
    match registry.call(Call::LastError { id })? {
        Reply::Diagnostic(message) => Ok(message),
        other => Err(unexpected(other)),
    }
}

// ============================================================================
// NIF Wrappers (delegate to pure logic)
// ============================================================================

/// Get the version of the kvlink-rustler bindings.
#[rustler::nif]
fn version() -> String {
    version_impl()
}

#[rustler::nif(schedule = "DirtyIo")]
fn allocate(id: i64) -> NifResult<Atom> {
    allocate_impl(&REGISTRY, id)
        .map(|_| atoms::ok())
        .map_err(to_nif_error)
}

/// Close and destroy the store for `id`. Unknown ids are ignored.
#[rustler::nif(schedule = "DirtyIo")]
fn release(id: i64) -> NifResult<Atom> {
    release_impl(&REGISTRY, id)
        .map(|_| atoms::ok())
        .map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn open(id: i64, path: String, truncate: bool) -> NifResult<Atom> {
    open_impl(&REGISTRY, id, path, truncate)
        .map(|_| atoms::ok())
        .map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn open_read_only(id: i64, path: String) -> NifResult<Atom> {
    open_read_only_impl(&REGISTRY, id, path)
        .map(|_| atoms::ok())
        .map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn close(id: i64) -> NifResult<Atom> {
    close_impl(&REGISTRY, id)
        .map(|_| atoms::ok())
        .map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn get(id: i64, key: String) -> NifResult<ElixirLookup> {
    get_impl(&REGISTRY, id, key).map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn check(id: i64, key: String) -> NifResult<bool> {
    check_impl(&REGISTRY, id, key).map_err(to_nif_error)
}

/// Insert or replace. With `overwrite` false, inserts only if absent.
#[rustler::nif(schedule = "DirtyIo")]
fn set(id: i64, key: String, value: String, overwrite: bool) -> NifResult<bool> {
    set_impl(&REGISTRY, id, key, value, overwrite).map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn size(id: i64) -> NifResult<u64> {
    size_impl(&REGISTRY, id).map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn key_dump(id: i64, destination: String) -> NifResult<u64> {
    key_dump_impl(&REGISTRY, id, destination).map_err(to_nif_error)
}

#[rustler::nif(schedule = "DirtyIo")]
fn last_error(id: i64) -> NifResult<String> {
    last_error_impl(&REGISTRY, id).map_err(to_nif_error)
}

// ============================================================================
// Rustler Init
// ============================================================================

rustler::init!("Elixir.Kvlink.Native");
