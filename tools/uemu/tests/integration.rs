//! End-to-end runs of the `uemu` binary against synthetic guests.

#![cfg(target_arch = "x86_64")]

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use uemu_pe::builder::{DEFAULT_IMAGE_BASE, ImageBuilder};

const SUCCESS: u64 = 0;
const LOAD_ERROR: u64 = 1 << 63 | 1;
const UNSUPPORTED: u64 = 1 << 63 | 3;

/// Writes `bytes` to a file unique to this test.
fn write_image(name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("uemu-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn uemu() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_uemu"));
    cmd.args(["--display", "headless"]).env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str], image: &PathBuf) -> Output {
    uemu().args(args).arg(image).output().unwrap()
}

/// `mov rax, status; ret`
fn returning(status: u64) -> Vec<u8> {
    let mut code = vec![0x48, 0xb8];
    code.extend_from_slice(&status.to_le_bytes());
    code.push(0xc3);
    ImageBuilder::new().text(&code).build()
}

/// Compares a relocated pointer in `.data` with the address of the string
/// it should point to, found RIP-relative. Returns `SUCCESS` when they
/// match, `LOAD_ERROR` otherwise.
fn self_checking() -> Vec<u8> {
    let builder = ImageBuilder::new();
    let text_rva = builder.next_virtual_address();
    let data_rva = text_rva + 0x1000;
    let slot = data_rva.wrapping_sub(text_rva + 7).to_le_bytes();
    let string = (data_rva + 8).wrapping_sub(text_rva + 14).to_le_bytes();

    let mut code = vec![
        0x48, 0x8b, 0x05, slot[0], slot[1], slot[2], slot[3], // mov rax, [rip + slot]
        0x48, 0x8d, 0x0d, string[0], string[1], string[2], string[3], // lea rcx, [rip + string]
        0x48, 0x39, 0xc8, // cmp rax, rcx
        0xb8, 0x00, 0x00, 0x00, 0x00, // mov eax, 0
        0x74, 0x0a, // je ret
        0x48, 0xb8, // mov rax, LOAD_ERROR
    ];
    code.extend_from_slice(&LOAD_ERROR.to_le_bytes());
    code.push(0xc3);

    let mut data = (DEFAULT_IMAGE_BASE + u64::from(data_rva) + 8).to_le_bytes().to_vec();
    data.extend_from_slice(b"h\0i\0\0\0");
    builder.text(&code).data(&data, 0x1000).dir64(data_rva).build()
}

/// Waits on `ConIn->WaitForKey`, which never fires in headless mode.
fn waiting() -> Vec<u8> {
    let code = [
        0x48, 0x83, 0xec, 0x38, // sub rsp, 0x38
        0x4c, 0x8b, 0x4a, 0x60, // mov r9, [rdx + BootServices]
        0x48, 0x8b, 0x42, 0x30, // mov rax, [rdx + ConIn]
        0x48, 0x8d, 0x50, 0x10, // lea rdx, [rax + WaitForKey]
        0xb9, 0x01, 0x00, 0x00, 0x00, // mov ecx, 1
        0x4c, 0x8d, 0x44, 0x24, 0x20, // lea r8, [rsp + 0x20]
        0x41, 0xff, 0x51, 0x60, // call [r9 + WaitForEvent]
        0x48, 0x83, 0xc4, 0x38, // add rsp, 0x38
        0xc3, // ret
    ];
    ImageBuilder::new().text(&code).build()
}

#[test]
fn successful_guest_exits_zero() {
    let image = write_image("success.efi", &returning(SUCCESS));
    let output = run(&[], &image);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
}

#[test]
fn error_status_is_negated() {
    let image = write_image("unsupported.efi", &returning(UNSUPPORTED));
    let output = run(&[], &image);
    assert_eq!(output.status.code(), Some(253), "{output:?}");
}

#[test]
fn flipped_dos_magic_fails_to_load() {
    let mut bytes = returning(SUCCESS);
    bytes[0] ^= 0xff;
    let image = write_image("bad-magic.efi", &bytes);
    let output = run(&[], &image);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("uemu: failed to load"), "{stderr}");
    assert!(stderr.contains("missing MZ signature"), "{stderr}");
}

#[test]
fn missing_image_fails_to_load() {
    let output = run(&[], &PathBuf::from("/nonexistent/app.efi"));
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn forced_relocation_fixes_pointers() {
    let image = write_image("relocating.efi", &self_checking());
    let output = run(&["--no-preferred-base"], &image);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let output = run(&[], &image);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
}

#[test]
fn bad_config_is_reported() {
    let image = write_image("config-guest.efi", &returning(SUCCESS));
    let config = write_image("bad.toml", b"[image]\nhonor_preferred_base = \"yes\"\n");
    let output = uemu()
        .arg("--config")
        .arg(&config)
        .arg(&image)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("bad.toml"));
}

#[test]
fn sigterm_interrupts_a_waiting_guest() {
    let image = write_image("waiting.efi", &waiting());
    let child = uemu()
        .arg(&image)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_millis(500));
    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
    kill(pid, Signal::SIGTERM).unwrap();
    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(130), "{output:?}");
}
