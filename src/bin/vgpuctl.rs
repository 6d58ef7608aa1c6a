use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use vgpu_bridge::{FixedHost, VgpuConfig, VgpuDevice};
use vgpu_protocol::{Access, Register};

#[derive(Parser)]
#[command(name = "vgpuctl", version, about = "Inspect vgpu device layouts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Realize one device against fixed host answers and print its layout
    Probe(ProbeArgs),
    /// Attach several VMs to one in-process arena and check their windows
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct ProbeArgs {
    /// Device configuration (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// VM id reported by the host
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    vm_id: i64,
    /// Host address of the dstore arena
    #[arg(long, value_parser = parse_u64)]
    arena_base: Option<u64>,
    /// Physical base of the zero-copy pool; enables zero-copy
    #[arg(long, value_parser = parse_u64)]
    zcopy_phys: Option<u64>,
    /// Host address of the zero-copy pool
    #[arg(long, value_parser = parse_u64)]
    zcopy_pool: Option<u64>,
    /// Override the dstore slot size
    #[arg(long, value_parser = parse_u64)]
    dstore_size: Option<u64>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of VMs to attach
    #[arg(long, default_value_t = 4)]
    vms: u32,
    /// Size of each dstore slot
    #[arg(long, value_parser = parse_u64, default_value = "0x100000")]
    slot_size: u64,
    /// Allocate a zero-copy pool of this size
    #[arg(long, value_parser = parse_u64)]
    zcopy_size: Option<u64>,
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Probe(args) => cmd_probe(args)?,
        Command::Simulate(args) => cmd_simulate(args)?,
    }
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => VgpuConfig::load(path)?,
        None => VgpuConfig::default(),
    };
    if let Some(size) = args.dstore_size {
        config = config.dstore_size(size);
    }

    let mut host = FixedHost::new(args.vm_id);
    if let Some(base) = args.arena_base {
        host = host.arena_base(base);
    }
    host = match (args.zcopy_phys, args.zcopy_pool) {
        (Some(phys), Some(pool)) => host.zero_copy(phys, pool),
        (Some(phys), None) => host.zero_copy_without_pool(phys),
        (None, Some(_)) => return Err("--zcopy-pool requires --zcopy-phys".into()),
        (None, None) => host,
    };

    let device = VgpuDevice::realize(&config, Arc::new(host))?;
    let registers: BTreeMap<&str, String> = Register::ALL
        .iter()
        .filter(|reg| reg.access() == Access::ReadOnly)
        .map(|reg| {
            (
                reg.name(),
                format!("{:#010x}", device.registers().read(reg.offset())),
            )
        })
        .collect();

    let report = json!({
        "layout": device.layout(),
        "register_values": registers,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(target_os = "linux")]
fn cmd_simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    use vgpu_bridge::ArenaHost;
    use vgpu_protocol::regs;

    let mut builder = ArenaHost::builder(args.slot_size, args.vms);
    let mut config = VgpuConfig::default().dstore_size(args.slot_size);
    if let Some(size) = args.zcopy_size {
        builder = builder.zero_copy(size, 0);
        config = config.zcopy_size(size);
    }
    let host = builder.build()?;

    let mut devices = Vec::new();
    for _ in 0..args.vms {
        let handle = host.attach()?;
        let device = VgpuDevice::realize(&config, Arc::new(handle))?;
        device.registers().write(regs::MOD_INIT, 1);
        devices.push(device);
    }

    for (i, a) in devices.iter().enumerate() {
        for b in &devices[i + 1..] {
            let (ra, rb) = (a.windows().dstore().host_range(), b.windows().dstore().host_range());
            if ra.start < rb.end && rb.start < ra.end {
                return Err(format!(
                    "dstore windows of vm {} and vm {} overlap",
                    a.identity().vm_id,
                    b.identity().vm_id
                )
                .into());
            }
        }
    }

    let vms: Vec<_> = devices
        .iter()
        .map(|device| {
            let vm_id = device.identity().vm_id;
            json!({
                "vm_id": vm_id,
                "dstore": device.windows().dstore(),
                "zcopy": device.windows().zcopy(),
                "lifecycle": host.lifecycle(vm_id),
            })
        })
        .collect();

    let report = json!({
        "arena_base": format!("{:#x}", host.arena_base()),
        "slot_size": format!("{:#x}", host.slot_size()),
        "vms": vms,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn cmd_simulate(_args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    Err("simulate needs the Linux arena host".into())
}
