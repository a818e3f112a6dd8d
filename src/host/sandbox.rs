use wasmtime::{
    Caller, Config, Engine, ExternType, Instance, Linker, Memory, MemoryType, Module, Store, Trap,
    TypedFunc,
};

use crate::error::{AcquireError, GuestAbort, InvokeError};

use super::InvokeOutput;

/// Exported function the bridge calls for every execution.
pub const ENTRY_POINT: &str = "run";

/// Optional export used to reserve space for the source text.
const ALLOC_EXPORT: &str = "alloc";

/// Size of the host-provided linear memory, in 64 KiB pages. Fixed: the
/// memory cannot grow past its initial size.
pub(crate) const MEMORY_PAGES: u32 = 256;

/// Fuel granted to each invocation (and to instantiation).
pub(crate) const FUEL_PER_CALL: u64 = 10_000_000;

/// Fuel consumed between cooperative yields back to the runtime.
const FUEL_YIELD_INTERVAL: u64 = 100_000;

/// Where the source is written when the module exports no `alloc`.
const SCRATCH_OFFSET: usize = 0x10000;

/// `(out_ptr: u32, out_len: u32)`, little-endian.
const OUT_SLOT_LEN: usize = 8;

#[derive(Default)]
pub(crate) struct HostData {
    memory: Option<Memory>,
    last_abort: Option<GuestAbort>,
}

pub(crate) fn engine() -> Result<Engine, AcquireError> {
    let mut config = Config::new();
    config.async_support(true);
    config.consume_fuel(true);
    Engine::new(&config).map_err(AcquireError::Sandbox)
}

/// An instantiated module together with the store that owns it.
///
/// Owned by the inbox loop once the host is ready; nothing else touches the
/// store or its memory.
pub(crate) struct Sandbox {
    store: Store<HostData>,
    instance: Instance,
    memory: Memory,
    alloc: Option<TypedFunc<i32, i32>>,
}

impl Sandbox {
    /// Compile `bytes` and instantiate them with exactly two imports:
    /// `env.memory` and `env.abort`.
    pub(crate) async fn instantiate(engine: &Engine, bytes: &[u8]) -> Result<Self, AcquireError> {
        let module = Module::new(engine, bytes).map_err(AcquireError::Compile)?;

        let mut store = Store::new(engine, HostData::default());
        store.set_fuel(FUEL_PER_CALL).map_err(AcquireError::Sandbox)?;
        store
            .fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))
            .map_err(AcquireError::Sandbox)?;

        let host_memory = Memory::new_async(&mut store, MemoryType::new(MEMORY_PAGES, Some(MEMORY_PAGES)))
            .await
            .map_err(AcquireError::Sandbox)?;
        store.data_mut().memory = Some(host_memory);

        let mut linker = Linker::new(engine);
        linker
            .define(&store, "env", "memory", host_memory)
            .map_err(AcquireError::Sandbox)?;
        linker
            .func_wrap("env", "abort", abort)
            .map_err(AcquireError::Sandbox)?;

        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| match store.data_mut().last_abort.take() {
                Some(abort) => AcquireError::Instantiate(wasmtime::Error::new(abort)),
                None => AcquireError::Instantiate(e),
            })?;

        let imports_memory = module
            .imports()
            .any(|import| import.module() == "env" && matches!(import.ty(), ExternType::Memory(_)));
        let memory = if imports_memory {
            host_memory
        } else {
            instance
                .get_memory(&mut store, "memory")
                .ok_or(AcquireError::NoMemory)?
        };
        store.data_mut().memory = Some(memory);

        instance
            .get_typed_func::<(i32, i32, i32), i32>(&mut store, ENTRY_POINT)
            .map_err(|_| AcquireError::MissingEntryPoint(ENTRY_POINT.to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
            .ok();

        // Without `alloc` every call writes at the scratch offset.
        let required = SCRATCH_OFFSET + OUT_SLOT_LEN;
        let size = memory.data_size(&store);
        if alloc.is_none() && size < required {
            return Err(AcquireError::MemoryTooSmall { size, required });
        }

        Ok(Self {
            store,
            instance,
            memory,
            alloc,
        })
    }

    /// Run `entry_point` over `source`.
    ///
    /// Traps leave the instance usable; the next call starts with fresh fuel.
    pub(crate) async fn invoke(
        &mut self,
        entry_point: &str,
        source: &str,
    ) -> Result<InvokeOutput, InvokeError> {
        let run = self
            .instance
            .get_typed_func::<(i32, i32, i32), i32>(&mut self.store, entry_point)
            .map_err(|_| InvokeError::MissingEntryPoint(entry_point.to_string()))?;

        self.store.data_mut().last_abort = None;
        self.store
            .set_fuel(FUEL_PER_CALL)
            .map_err(|e| InvokeError::Trap(format!("{e:#}")))?;

        let src = source.as_bytes();
        let too_large = || InvokeError::InputTooLarge { len: src.len() };
        let slot_offset = align8(src.len()).ok_or_else(too_large)?;
        let total = slot_offset.checked_add(OUT_SLOT_LEN).ok_or_else(too_large)?;
        let total_i32 = i32::try_from(total).map_err(|_| too_large())?;

        let base = match &self.alloc {
            Some(alloc) => {
                let ptr = alloc
                    .call_async(&mut self.store, total_i32)
                    .await
                    .map_err(|e| classify(&mut self.store, e))?;
                ptr as u32 as usize
            }
            None => SCRATCH_OFFSET,
        };
        let end = base.checked_add(total).ok_or_else(too_large)?;
        if end > self.memory.data_size(&self.store) {
            return Err(too_large());
        }

        let slot = base + slot_offset;
        self.memory
            .write(&mut self.store, base, src)
            .map_err(|_| too_large())?;
        self.memory
            .write(&mut self.store, slot, &[0; OUT_SLOT_LEN])
            .map_err(|_| too_large())?;

        // All three values lie inside a 16 MiB memory, so they fit in i32.
        let status = run
            .call_async(&mut self.store, (base as i32, src.len() as i32, slot as i32))
            .await
            .map_err(|e| classify(&mut self.store, e))?;

        let mut slot_bytes = [0u8; OUT_SLOT_LEN];
        self.memory
            .read(&self.store, slot, &mut slot_bytes)
            .map_err(|_| InvokeError::OutputOutOfBounds {
                ptr: slot as u32,
                len: OUT_SLOT_LEN as u32,
            })?;
        let [p0, p1, p2, p3, l0, l1, l2, l3] = slot_bytes;
        let out_ptr = u32::from_le_bytes([p0, p1, p2, p3]);
        let out_len = u32::from_le_bytes([l0, l1, l2, l3]);

        let data = self.memory.data(&self.store);
        let start = out_ptr as usize;
        let output = start
            .checked_add(out_len as usize)
            .and_then(|end| data.get(start..end))
            .ok_or(InvokeError::OutputOutOfBounds {
                ptr: out_ptr,
                len: out_len,
            })?
            .to_vec();

        Ok(InvokeOutput { status, output })
    }
}

fn align8(len: usize) -> Option<usize> {
    len.checked_add(7).map(|n| n & !7)
}

fn classify(store: &mut Store<HostData>, error: wasmtime::Error) -> InvokeError {
    if let Some(abort) = store.data_mut().last_abort.take() {
        return InvokeError::Aborted(abort);
    }
    if let Some(abort) = error.downcast_ref::<GuestAbort>() {
        return InvokeError::Aborted(abort.clone());
    }
    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => InvokeError::OutOfFuel,
        Some(trap) => InvokeError::Trap(trap.to_string()),
        None => InvokeError::Trap(format!("{error:#}")),
    }
}

/// `env.abort(message, file, line, column)`.
///
/// Records the abort in the store and traps the current call; the host
/// process is never affected.
fn abort(
    mut caller: Caller<'_, HostData>,
    message: i32,
    file: i32,
    line: i32,
    column: i32,
) -> wasmtime::Result<()> {
    let (message, file) = match caller.data().memory {
        Some(memory) => {
            let data = memory.data(&caller);
            (read_guest_string(data, message), read_guest_string(data, file))
        }
        None => (None, None),
    };
    let abort = GuestAbort {
        message,
        file,
        line: u32::try_from(line).unwrap_or(0),
        column: u32::try_from(column).unwrap_or(0),
    };
    tracing::warn!(%abort, "module called env.abort");
    caller.data_mut().last_abort = Some(abort.clone());
    Err(wasmtime::Error::new(abort))
}

/// Decode a UTF-16 string whose byte length is stored in the four bytes
/// before `ptr`. Null or unreadable pointers yield `None`.
fn read_guest_string(data: &[u8], ptr: i32) -> Option<String> {
    let ptr = usize::try_from(ptr).ok().filter(|&p| p >= 4)?;
    let [a, b, c, d]: [u8; 4] = data.get(ptr - 4..ptr)?.try_into().ok()?;
    let len = u32::from_le_bytes([a, b, c, d]) as usize;
    let raw = data.get(ptr..ptr.checked_add(len)?)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}
