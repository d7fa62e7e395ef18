//! Layouts for a subset of the .NET runtime provider's GC and loader events.

use crate::schema::EventTemplate;
use crate::static_event;
use crate::types::Guid;

/// Microsoft-Windows-DotNETRuntime.
pub const PROVIDER_ID: Guid = Guid::from_u128(0xe13c0d23_ccbc_4e12_931b_d9cc2eee27e4);

pub const PROVIDER_NAME: &str = "Microsoft-Windows-DotNETRuntime";

static_event! {
    pub fn gc_start() {
        provider: (PROVIDER_ID, PROVIDER_NAME),
        event: ("GC/Start", 1),
        task: ("GC", 1),
        opcode: ("Start", 1),
        versions: {
            0 => ["Count": UInt32, "Reason": UInt32],
            1 => [
                "Count": UInt32,
                "Depth": UInt32,
                "Reason": UInt32,
                "Type": UInt32,
                "ClrInstanceID": UInt16,
            ],
            2 => [
                "Count": UInt32,
                "Depth": UInt32,
                "Reason": UInt32,
                "Type": UInt32,
                "ClrInstanceID": UInt16,
                "ClientSequenceNumber": UInt64,
            ],
        },
    }
}

static_event! {
    pub fn gc_end() {
        provider: (PROVIDER_ID, PROVIDER_NAME),
        event: ("GC/Stop", 2),
        task: ("GC", 1),
        opcode: ("Stop", 2),
        versions: {
            // The v0 struct is padded to 4-byte alignment.
            0 padded 8 => ["Count": UInt32, "Depth": UInt16],
            1 => ["Count": UInt32, "Depth": UInt32, "ClrInstanceID": UInt16],
        },
    }
}

static_event! {
    pub fn gc_heap_stats() {
        provider: (PROVIDER_ID, PROVIDER_NAME),
        event: ("GC/HeapStats", 4),
        task: ("GC", 1),
        opcode: ("HeapStats", 133),
        versions: {
            // The v0 struct is 8-byte aligned: 92 bytes of fields report as 96.
            0 padded 96 => [
                "GenerationSize0": UInt64,
                "TotalPromotedSize0": UInt64,
                "GenerationSize1": UInt64,
                "TotalPromotedSize1": UInt64,
                "GenerationSize2": UInt64,
                "TotalPromotedSize2": UInt64,
                "GenerationSize3": UInt64,
                "TotalPromotedSize3": UInt64,
                "FinalizationPromotedSize": UInt64,
                "FinalizationPromotedCount": UInt64,
                "PinnedObjectCount": UInt32,
                "SinkBlockCount": UInt32,
                "GCHandleCount": UInt32,
            ],
            1 => [
                "GenerationSize0": UInt64,
                "TotalPromotedSize0": UInt64,
                "GenerationSize1": UInt64,
                "TotalPromotedSize1": UInt64,
                "GenerationSize2": UInt64,
                "TotalPromotedSize2": UInt64,
                "GenerationSize3": UInt64,
                "TotalPromotedSize3": UInt64,
                "FinalizationPromotedSize": UInt64,
                "FinalizationPromotedCount": UInt64,
                "PinnedObjectCount": UInt32,
                "SinkBlockCount": UInt32,
                "GCHandleCount": UInt32,
                "ClrInstanceID": UInt16,
            ],
        },
    }
}

static_event! {
    pub fn gc_allocation_tick() {
        provider: (PROVIDER_ID, PROVIDER_NAME),
        event: ("GC/AllocationTick", 10),
        task: ("GC", 1),
        opcode: ("AllocationTick", 11),
        versions: {
            0 => ["AllocationAmount": UInt32, "AllocationKind": UInt32],
            1 => ["AllocationAmount": UInt32, "AllocationKind": UInt32, "ClrInstanceID": UInt16],
            2 => [
                "AllocationAmount": UInt32,
                "AllocationKind": UInt32,
                "ClrInstanceID": UInt16,
                "AllocationAmount64": UInt64,
                "TypeID": Pointer,
                "TypeName": UnicodeString,
                "HeapIndex": UInt32,
            ],
            3 => [
                "AllocationAmount": UInt32,
                "AllocationKind": UInt32,
                "ClrInstanceID": UInt16,
                "AllocationAmount64": UInt64,
                "TypeID": Pointer,
                "TypeName": UnicodeString,
                "HeapIndex": UInt32,
                "Address": Pointer,
            ],
        },
    }
}

static_event! {
    pub fn module_load() {
        provider: (PROVIDER_ID, PROVIDER_NAME),
        event: ("Loader/ModuleLoad", 152),
        task: ("Loader", 10),
        opcode: ("ModuleLoad", 33),
        versions: {
            0 => [
                "ModuleID": UInt64,
                "AssemblyID": UInt64,
                "ModuleFlags": UInt32,
                "Reserved1": UInt32,
                "ModuleILPath": UnicodeString,
                "ModuleNativePath": UnicodeString,
            ],
            1 => [
                "ModuleID": UInt64,
                "AssemblyID": UInt64,
                "ModuleFlags": UInt32,
                "Reserved1": UInt32,
                "ModuleILPath": UnicodeString,
                "ModuleNativePath": UnicodeString,
                "ClrInstanceID": UInt16,
            ],
            2 => [
                "ModuleID": UInt64,
                "AssemblyID": UInt64,
                "ModuleFlags": UInt32,
                "Reserved1": UInt32,
                "ModuleILPath": UnicodeString,
                "ModuleNativePath": UnicodeString,
                "ClrInstanceID": UInt16,
                "ManagedPdbSignature": Guid,
                "ManagedPdbAge": UInt32,
                "ManagedPdbBuildPath": UnicodeString,
                "NativePdbSignature": Guid,
                "NativePdbAge": UInt32,
                "NativePdbBuildPath": UnicodeString,
            ],
        },
    }
}

pub fn templates() -> Vec<EventTemplate> {
    vec![
        gc_start(),
        gc_end(),
        gc_heap_stats(),
        gc_allocation_tick(),
        module_load(),
    ]
}
