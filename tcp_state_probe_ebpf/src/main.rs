#![no_std]
#![no_main]

mod types;

use aya_ebpf::{
    helpers::bpf_probe_read_kernel,
    macros::{kprobe, map},
    maps::PerfEventArray,
    programs::ProbeContext,
};

use types::*;

// ============================================================================
// Maps
// ============================================================================

#[map]
static EVENTS: PerfEventArray<RawTcpEvent> = PerfEventArray::with_max_entries(1024, 0);

// WARNING: These offsets are kernel version dependent (6.1, x86_64)!
// Use BTF/CO-RE in production for portability

// struct sock_common
const SKC_DADDR: usize = 0x00;
const SKC_RCV_SADDR: usize = 0x04;
const SKC_DPORT: usize = 0x0c;
const SKC_NUM: usize = 0x0e;
const SKC_FAMILY: usize = 0x10;
const SKC_STATE: usize = 0x12;
const SKC_V6_DADDR: usize = 0x38;
const SKC_V6_RCV_SADDR: usize = 0x48;

// struct tcp_sock
const TP_RCV_WND: usize = 0x5ac;
const TP_SND_NXT: usize = 0x5f8;
const TP_SND_UNA: usize = 0x630;
const TP_MSS_CACHE: usize = 0x5f4;
const TP_SRTT_US: usize = 0x668;
const TP_SND_WND: usize = 0x62c;
const TP_SND_CWND: usize = 0x6a0;
const TP_SND_SSTHRESH: usize = 0x69c;

// struct sk_buff
const SKB_LEN: usize = 0x70;
const SKB_MARK: usize = 0xa8;

// Helper Functions

#[inline(always)]
unsafe fn read_kernel<T>(src: *const T) -> Result<T, i64> {
    bpf_probe_read_kernel(src).map_err(|e| e as i64)
}

#[inline(always)]
unsafe fn read_at<T>(base: *const u8, offset: usize) -> Result<T, i64> {
    read_kernel(base.add(offset) as *const T)
}

#[inline(always)]
fn capture(ctx: &ProbeContext, sk: *const u8, skb: *const u8, direction: u8) -> Result<(), i64> {
    let family: u16 = unsafe { read_at(sk, SKC_FAMILY)? };

    let mut src_addr = [0u8; 16];
    let mut dst_addr = [0u8; 16];
    match family {
        AF_INET => unsafe {
            let src: [u8; 4] = read_at(sk, SKC_RCV_SADDR)?;
            let dst: [u8; 4] = read_at(sk, SKC_DADDR)?;
            src_addr[..4].copy_from_slice(&src);
            dst_addr[..4].copy_from_slice(&dst);
        },
        AF_INET6 => unsafe {
            src_addr = read_at(sk, SKC_V6_RCV_SADDR)?;
            dst_addr = read_at(sk, SKC_V6_DADDR)?;
        },
        // userspace only logs inet sockets
        _ => return Ok(()),
    }

    // skc_num is host order, skc_dport is already network order
    let local_port: u16 = unsafe { read_at(sk, SKC_NUM)? };
    let skb_len: u32 = unsafe { read_at(skb, SKB_LEN).unwrap_or(0) };

    let event = unsafe {
        RawTcpEvent {
            family,
            src_port: local_port.to_be(),
            dst_port: read_at(sk, SKC_DPORT)?,
            length: skb_len as u16,
            mark: read_at(skb, SKB_MARK).unwrap_or(0),
            src_addr,
            dst_addr,
            snd_nxt: read_at(sk, TP_SND_NXT)?,
            snd_una: read_at(sk, TP_SND_UNA)?,
            snd_wnd: read_at(sk, TP_SND_WND)?,
            rcv_wnd: read_at(sk, TP_RCV_WND)?,
            snd_cwnd: read_at(sk, TP_SND_CWND)?,
            ssthresh: read_at(sk, TP_SND_SSTHRESH)?,
            srtt_us: read_at::<u32>(sk, TP_SRTT_US)? >> 3,
            mss_cache: read_at(sk, TP_MSS_CACHE)?,
            state: read_at(sk, SKC_STATE)?,
            direction,
            _pad: [0; 2],
        }
    };

    EVENTS.output(ctx, &event, 0);

    Ok(())
}

// Probes

#[kprobe]
pub fn tcp_transmit_skb(ctx: ProbeContext) -> u32 {
    match try_tcp_transmit_skb(ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_tcp_transmit_skb(ctx: ProbeContext) -> Result<(), i64> {
    let sk: *const u8 = ctx.arg(0).ok_or(1i64)?;
    let skb: *const u8 = ctx.arg(1).ok_or(1i64)?;
    capture(&ctx, sk, skb, DIR_OUTBOUND)
}

#[kprobe]
pub fn tcp_v4_do_rcv(ctx: ProbeContext) -> u32 {
    match try_tcp_do_rcv(ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

#[kprobe]
pub fn tcp_v6_do_rcv(ctx: ProbeContext) -> u32 {
    match try_tcp_do_rcv(ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_tcp_do_rcv(ctx: ProbeContext) -> Result<(), i64> {
    let sk: *const u8 = ctx.arg(0).ok_or(1i64)?;
    let skb: *const u8 = ctx.arg(1).ok_or(1i64)?;
    capture(&ctx, sk, skb, DIR_INBOUND)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
