//! Worker instance sizes offered per cloud framework.

use serde::Serialize;

use super::CloudFramework;

/// Broad sizing family of an instance type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceCategory {
    /// Balanced CPU and memory.
    GeneralPurpose,
    /// High CPU to memory ratio.
    ComputeOptimized,
    /// High memory to CPU ratio.
    MemoryOptimized,
}

/// An instance size a worker can be provisioned with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceType {
    /// Provider name of the size.
    pub key: &'static str,
    /// Sizing family.
    pub category: InstanceCategory,
    /// Virtual CPUs.
    pub vcpu_count: u32,
    /// Memory in MiB.
    pub ram_mib: u32,
}

const fn size(
    key: &'static str,
    category: InstanceCategory,
    vcpu_count: u32,
    ram_mib: u32,
) -> InstanceType {
    InstanceType {
        key,
        category,
        vcpu_count,
        ram_mib,
    }
}

use InstanceCategory::{ComputeOptimized, GeneralPurpose, MemoryOptimized};

const EC2: &[InstanceType] = &[
    size("t2.medium", GeneralPurpose, 2, 4096),
    size("t2.large", GeneralPurpose, 2, 8192),
    size("t2.xlarge", GeneralPurpose, 4, 16384),
    size("t2.2xlarge", GeneralPurpose, 8, 32768),
    size("m4.large", GeneralPurpose, 2, 8192),
    size("m4.xlarge", GeneralPurpose, 4, 16384),
    size("m4.2xlarge", GeneralPurpose, 8, 32768),
    size("m4.4xlarge", GeneralPurpose, 16, 65536),
    size("c4.large", ComputeOptimized, 2, 3840),
    size("c4.xlarge", ComputeOptimized, 4, 7680),
    size("c4.2xlarge", ComputeOptimized, 8, 15360),
    size("r4.large", MemoryOptimized, 2, 15616),
    size("r4.xlarge", MemoryOptimized, 4, 31232),
];

const AZURE: &[InstanceType] = &[
    size("Standard_DS1_v2", GeneralPurpose, 1, 3584),
    size("Standard_DS2_v2", GeneralPurpose, 2, 7168),
    size("Standard_DS3_v2", GeneralPurpose, 4, 14336),
    size("Standard_DS4_v2", GeneralPurpose, 8, 28672),
    size("Standard_D2s_v3", GeneralPurpose, 2, 8192),
    size("Standard_D4s_v3", GeneralPurpose, 4, 16384),
    size("Standard_F2s_v2", ComputeOptimized, 2, 4096),
    size("Standard_F4s_v2", ComputeOptimized, 4, 8192),
    size("Standard_E2s_v3", MemoryOptimized, 2, 16384),
    size("Standard_E4s_v3", MemoryOptimized, 4, 32768),
];

/// Instance sizes offered for `framework`.
#[must_use]
pub const fn for_framework(framework: CloudFramework) -> &'static [InstanceType] {
    match framework {
        CloudFramework::Ec2 => EC2,
        CloudFramework::Azure => AZURE,
    }
}
