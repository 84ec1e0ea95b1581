//! Network stack integration tests.
//!
//! Exercises the device/ethernet/ARP/IP/ICMP layers end to end over the
//! loopback device that `net::device::init()` always brings up under
//! `eth0`, rather than `tcp`/`udp`/`socket` which are still settling.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(jsos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;

use jsos_kernel::{
    kernel_assert, kernel_assert_eq, mm,
    net::{
        self,
        arp,
        device::{self, DeviceState, NetworkDevice},
        ethernet::{self, ETHERTYPE_IPV4},
        icmp::{self, IcmpHeader, TYPE_ECHO_REPLY, TYPE_ECHO_REQUEST},
        ip::{self, IpProtocol},
        IpAddress, Ipv4Address, MacAddress,
    },
    serial_println,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    mm::heap::init();
    common::init_test_env("Network Stack Tests");
    test_main();
    loop {
        jsos_kernel::arch::halt();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    jsos_kernel::test_panic_handler(info)
}

/// `net::init()` brings up every layer in order and is idempotent from this
/// binary's point of view: each test below calls it fresh since there is no
/// teardown between `#[test_case]`s.
fn bring_up_stack() {
    net::init().expect("network stack init");
}

#[test_case]
fn test_device_init_brings_up_loopback_and_eth0() {
    bring_up_stack();

    let lo = device::get_device("lo0").expect("lo0 registered");
    kernel_assert_eq!(lo.state(), DeviceState::Up);

    let eth0 = device::get_device("eth0").expect("eth0 registered");
    kernel_assert_eq!(eth0.state(), DeviceState::Up);

    serial_println!("[ok]");
}

#[test_case]
fn test_ethernet_construct_parse_roundtrip() {
    let dst = MacAddress([0xFF; 6]);
    let src = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    let payload = b"roundtrip payload";

    let frame = ethernet::construct_frame(dst, src, ETHERTYPE_IPV4, payload);
    let parsed = ethernet::parse_frame(&frame).unwrap();

    kernel_assert_eq!(parsed.dst_mac, dst);
    kernel_assert_eq!(parsed.src_mac, src);
    kernel_assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
    kernel_assert_eq!(parsed.payload, payload);

    serial_println!("[ok]");
}

#[test_case]
fn test_ip_configure_and_query_interface() {
    let addr = Ipv4Address::new(192, 168, 1, 50);
    let mask = Ipv4Address::new(255, 255, 255, 0);
    ip::configure_interface(addr, mask);

    kernel_assert_eq!(ip::get_interface_ip(), addr);
    kernel_assert_eq!(ip::get_interface_netmask(), mask);

    serial_println!("[ok]");
}

#[test_case]
fn test_ip_header_checksum_roundtrip() {
    let src = Ipv4Address::new(10, 0, 2, 15);
    let dst = Ipv4Address::new(10, 0, 2, 2);
    let mut header = ip::Ipv4Header::new(src, dst, IpProtocol::Tcp);
    header.total_length = 20;
    header.calculate_checksum();

    let bytes = header.to_bytes();
    let parsed = ip::Ipv4Header::from_bytes(&bytes).unwrap();

    kernel_assert_eq!(parsed.source, src);
    kernel_assert_eq!(parsed.destination, dst);
    kernel_assert_eq!(parsed.protocol, IpProtocol::Tcp as u8);
    kernel_assert_eq!(parsed.checksum, header.checksum);

    serial_println!("[ok]");
}

#[test_case]
fn test_ip_send_to_self_loops_back_on_device() {
    bring_up_stack();

    let self_ip = ip::get_interface_ip();
    let payload = b"ping-to-self";

    ip::send(IpAddress::V4(self_ip), IpProtocol::Icmp, payload).unwrap();

    // The primary interface is bound to `eth0`; a send to our own address
    // loops back without touching ARP, landing directly on its rx queue.
    let received = device::with_device_mut("eth0", |dev| dev.receive())
        .unwrap()
        .expect("eth0 had a queued frame")
        .expect("frame was non-empty");

    let frame = ethernet::parse_frame(received.data()).unwrap();
    kernel_assert_eq!(frame.ethertype, ETHERTYPE_IPV4);

    let ip_header = ip::Ipv4Header::from_bytes(frame.payload).unwrap();
    kernel_assert_eq!(ip_header.source, self_ip);
    kernel_assert_eq!(ip_header.destination, self_ip);
    kernel_assert_eq!(ip_header.protocol, IpProtocol::Icmp as u8);

    serial_println!("[ok]");
}

#[test_case]
fn test_icmp_echo_request_elicits_reply_to_self() {
    bring_up_stack();

    let self_ip = ip::get_interface_ip();
    let payload = b"abcdefgh";

    // Sending an echo request to ourselves hands us back, via the loopback
    // path, an Ethernet/IP frame whose payload is itself an ICMP echo
    // *request* we queued; `icmp::process_packet` then answers it with a
    // reply, queued right behind it on the same interface.
    icmp::send_echo_request(IpAddress::V4(self_ip), 0xBEEF, 7, payload).unwrap();

    let queued_request = device::with_device_mut("eth0", |dev| dev.receive())
        .unwrap()
        .expect("request frame queued")
        .expect("request frame was non-empty");
    let frame = ethernet::parse_frame(queued_request.data()).unwrap();
    let ip_header = ip::Ipv4Header::from_bytes(frame.payload).unwrap();
    let header_len = (ip_header.ihl as usize) * 4;
    let icmp_data = &frame.payload[header_len..];

    let icmp_header = IcmpHeader::from_bytes(icmp_data).unwrap();
    kernel_assert_eq!(icmp_header.icmp_type, TYPE_ECHO_REQUEST);
    kernel_assert_eq!(icmp_header.identifier, 0xBEEF);
    kernel_assert_eq!(icmp_header.sequence, 7);

    icmp::process_packet(
        IpAddress::V4(self_ip),
        IpAddress::V4(self_ip),
        icmp_data,
    )
    .unwrap();

    let queued_reply = device::with_device_mut("eth0", |dev| dev.receive())
        .unwrap()
        .expect("reply frame queued")
        .expect("reply frame was non-empty");
    let reply_frame = ethernet::parse_frame(queued_reply.data()).unwrap();
    let reply_ip = ip::Ipv4Header::from_bytes(reply_frame.payload).unwrap();
    let reply_header_len = (reply_ip.ihl as usize) * 4;
    let reply_icmp = IcmpHeader::from_bytes(&reply_frame.payload[reply_header_len..]).unwrap();

    kernel_assert_eq!(reply_icmp.icmp_type, TYPE_ECHO_REPLY);
    kernel_assert_eq!(reply_icmp.identifier, 0xBEEF);
    kernel_assert_eq!(reply_icmp.sequence, 7);

    serial_println!("[ok]");
}

#[test_case]
fn test_arp_cache_update_and_resolve() {
    arp::flush_cache();

    let ip = Ipv4Address::new(10, 0, 2, 3);
    let mac = MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    kernel_assert!(arp::resolve(ip).is_none());

    arp::update_cache(ip, mac);
    kernel_assert_eq!(arp::resolve(ip), Some(mac));

    let entries: Vec<(Ipv4Address, MacAddress)> = arp::get_cache_entries();
    kernel_assert!(entries.iter().any(|&(e_ip, e_mac)| e_ip == ip && e_mac == mac));

    arp::flush_cache();
    kernel_assert!(arp::resolve(ip).is_none());

    serial_println!("[ok]");
}

#[test_case]
fn test_network_stats_track_tx() {
    bring_up_stack();

    let before = net::get_stats();
    let self_ip = ip::get_interface_ip();
    ip::send(IpAddress::V4(self_ip), IpProtocol::Udp, b"stats").unwrap();
    let after = net::get_stats();

    kernel_assert!(after.packets_sent > before.packets_sent);
    kernel_assert!(after.bytes_sent > before.bytes_sent);

    // Drain so later tests in this binary don't see a stale queued frame.
    let _ = device::with_device_mut("eth0", |dev| dev.receive());

    serial_println!("[ok]");
}
