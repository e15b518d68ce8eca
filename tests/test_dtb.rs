//! Host device tree discovery on hand-built flattened device trees.

use vgic::dtb::{self, PlatformInfo};
use vgic::platform::{MAX_SMP_CPUS, UART_BASE};
use vgic::GicVersion;

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_END: u32 = 9;
const HEADER_LEN: usize = 40;
const RSVMAP_LEN: usize = 16;

/// Minimal FDT writer: structure block plus strings block, empty
/// memory reservation map.
#[derive(Default)]
struct FdtBuilder {
    structs: Vec<u8>,
    strings: Vec<u8>,
}

impl FdtBuilder {
    fn word(&mut self, v: u32) {
        self.structs.extend_from_slice(&v.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.structs.len() % 4 != 0 {
            self.structs.push(0);
        }
    }

    fn begin(&mut self, name: &str) -> &mut Self {
        self.word(FDT_BEGIN_NODE);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
        self
    }

    fn end(&mut self) -> &mut Self {
        self.word(FDT_END_NODE);
        self
    }

    fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let nameoff = self.string_offset(name);
        self.word(FDT_PROP);
        self.word(value.len() as u32);
        self.word(nameoff);
        self.structs.extend_from_slice(value);
        self.pad();
        self
    }

    fn cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let value: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.prop(name, &value)
    }

    fn strs(&mut self, name: &str, list: &[&str]) -> &mut Self {
        let value: Vec<u8> = list.iter().flat_map(|s| s.bytes().chain([0])).collect();
        self.prop(name, &value)
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let mut off = 0;
        for s in self.strings.split(|&b| b == 0) {
            if s == name.as_bytes() {
                return off as u32;
            }
            off += s.len() + 1;
        }
        let off = self.strings.len();
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        off as u32
    }

    /// `/cpus` with `n` cpu nodes.
    fn cpus(&mut self, n: u32) -> &mut Self {
        self.begin("cpus").cells("#address-cells", &[1]).cells("#size-cells", &[0]);
        for i in 0..n {
            self.begin(&format!("cpu@{i}"))
                .strs("device_type", &["cpu"])
                .strs("compatible", &["arm,cortex-a57"])
                .cells("reg", &[i])
                .end();
        }
        self.end()
    }

    fn finish(&mut self) -> Vec<u8> {
        self.word(FDT_END);
        let off_struct = HEADER_LEN + RSVMAP_LEN;
        let off_strings = off_struct + self.structs.len();
        let total = off_strings + self.strings.len();
        let header = [
            FDT_MAGIC,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            HEADER_LEN as u32,
            17,
            16,
            0,
            self.strings.len() as u32,
            self.structs.len() as u32,
        ];
        let mut blob: Vec<u8> = header.iter().flat_map(|w| w.to_be_bytes()).collect();
        blob.extend_from_slice(&[0; RSVMAP_LEN]);
        blob.extend_from_slice(&self.structs);
        blob.extend_from_slice(&self.strings);
        blob
    }
}

/// Root node with 64-bit addresses and sizes, as on the virt boards.
fn root() -> FdtBuilder {
    let mut fdt = FdtBuilder::default();
    fdt.begin("")
        .cells("#address-cells", &[2])
        .cells("#size-cells", &[2])
        .strs("compatible", &["linux,dummy-virt"]);
    fdt
}

#[test]
fn gicv3_board() {
    let mut fdt = root();
    fdt.cpus(2);
    fdt.begin("pl011@1c090000")
        .strs("compatible", &["arm,pl011", "arm,primecell"])
        .cells("reg", &[0, 0x1c09_0000, 0, 0x1000])
        .end();
    fdt.begin("interrupt-controller@2f000000")
        .strs("compatible", &["arm,gic-v3"])
        .cells(
            "reg",
            &[0, 0x2f00_0000, 0, 0x1_0000, 0, 0x2f10_0000, 0, 0x10_0000],
        )
        .prop("interrupt-controller", &[])
        .end();
    let blob = fdt.end().finish();

    // Test 1: every field comes from the tree
    assert_eq!(
        dtb::parse(&blob),
        Some(PlatformInfo {
            uart_base: 0x1c09_0000,
            gic_version: GicVersion::V3,
            gicd_base: 0x2f00_0000,
            gicr_base: 0x2f10_0000,
            gicr_size: 0x10_0000,
            num_cpus: 2,
        })
    );

    // Test 2: a blob cut short of its header's totalsize is rejected
    assert_eq!(dtb::parse(&blob[..blob.len() - 4]), None);
}

#[test]
fn gicv2_board_caps_cpus() {
    let mut fdt = root();
    fdt.cpus(12);
    fdt.begin("interrupt-controller@2c001000")
        .strs("compatible", &["arm,cortex-a15-gic", "arm,cortex-a9-gic"])
        .cells("reg", &[0, 0x2c00_1000, 0, 0x1000, 0, 0x2c00_2000, 0, 0x2000])
        .end();
    let blob = fdt.end().finish();
    let info = dtb::parse(&blob).expect("valid FDT");

    // Test 3: GICv2 has no redistributors; the CPU interface is not a GICR
    assert_eq!(info.gic_version, GicVersion::V2);
    assert_eq!(info.gicd_base, 0x2c00_1000);
    assert_eq!(info.gicr_base, 0);
    assert_eq!(info.gicr_size, 0);

    // Test 4: more CPUs than can be partitioned
    assert_eq!(info.num_cpus, MAX_SMP_CPUS);

    // Test 5: no PL011 keeps the default console
    assert_eq!(info.uart_base, UART_BASE as u64);
}

#[test]
fn missing_gic_keeps_defaults() {
    let mut fdt = root();
    fdt.cpus(1);
    let blob = fdt.end().finish();
    let info = dtb::parse(&blob).expect("valid FDT");

    // Test 6: only the CPU count changes
    assert_eq!(info, PlatformInfo { num_cpus: 1, ..PlatformInfo::qemu_virt() });
}
