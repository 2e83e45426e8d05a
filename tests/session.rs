//! End-to-end tests driving a mounted session through the loopback
//! transport, with the test playing the driver side.

use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{unbounded, Receiver, Sender};

use dokan::operations::{FILE_CREATE, FILE_DIRECTORY_FILE, FILE_READ_ONLY_VOLUME};
use dokan::{
    loopback, DiskSpaceInfo, DriverStub, FileSystemHandler, FindData, FindFilesIter,
    MountOptions, NtStatus, OperationInfo, OperationKind, OperationResult, Reply, ReplyPayload,
    Request, Session, VolumeInfo,
};

const WAIT: Duration = Duration::from_secs(5);

struct Volume {
    driver: DriverStub,
    thread: thread::JoinHandle<()>,
}

impl Volume {
    fn mount<H: FileSystemHandler + 'static>(mount_point: &str, handler: H) -> Volume {
        Volume::mount_with(mount_point, handler, |_| ())
    }

    fn mount_with<H: FileSystemHandler + 'static>(
        mount_point: &str,
        handler: H,
        tweak: impl FnOnce(&mut MountOptions),
    ) -> Volume {
        let (transport, driver) = loopback();
        let mut options = MountOptions {
            mount_point: mount_point.to_owned(),
            thread_count: 4,
            timeout: Duration::from_secs(5),
            ..MountOptions::default()
        };
        tweak(&mut options);
        let session = Session::mount(options, handler, transport).unwrap();
        let thread = thread::spawn(move || session.run());
        Volume { driver, thread }
    }

    fn call(&self, request: Request) -> Reply {
        self.driver.submit(request).unwrap();
        self.driver.recv_reply(WAIT).expect("no reply")
    }

    fn unmount(self) {
        self.driver.shutdown();
        self.thread.join().unwrap();
    }
}

fn create(unique: u64, path: &str, handle: u64) -> Request {
    Request::new(
        unique,
        path,
        handle,
        OperationKind::Create {
            desired_access: 0,
            file_attributes: 0,
            share_access: 0,
            create_disposition: FILE_CREATE,
            create_options: 0,
        },
    )
}

fn entry(file_name: &str) -> FindData {
    let now = SystemTime::now();
    FindData {
        file_name: file_name.to_owned(),
        attributes: 0,
        creation_time: now,
        last_access_time: now,
        last_write_time: now,
        file_size: 0,
    }
}

/// Remembers whether it has been read before via the handle context.
struct ContextFs;

impl FileSystemHandler for ContextFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn read_file(
        &self,
        _path: &str,
        _offset: i64,
        _length: u32,
        info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        let seen = info.context();
        info.set_context(7);
        Ok(vec![seen as u8])
    }
}

#[test]
fn context_lives_with_the_handle() {
    let volume = Volume::mount("C:\\mount\\ctx", ContextFs);
    let read = |unique| Request::new(unique, "\\foo.txt", 1, OperationKind::Read { offset: 0, length: 1 });

    assert_eq!(volume.call(create(1, "\\foo.txt", 1)).status, NtStatus::SUCCESS);
    match volume.call(read(2)).payload {
        ReplyPayload::Data(data) => assert_eq!(data, vec![0]),
        payload => panic!("unexpected payload {:?}", payload),
    }
    match volume.call(read(3)).payload {
        ReplyPayload::Data(data) => assert_eq!(data, vec![7]),
        payload => panic!("unexpected payload {:?}", payload),
    }

    // Closing the handle discards the context; a new handle starts fresh.
    volume.call(Request::new(4, "\\foo.txt", 1, OperationKind::Cleanup));
    volume.call(Request::new(5, "\\foo.txt", 1, OperationKind::Close));
    assert_eq!(volume.call(create(6, "\\foo.txt", 1)).status, NtStatus::SUCCESS);
    match volume.call(read(7)).payload {
        ReplyPayload::Data(data) => assert_eq!(data, vec![0]),
        payload => panic!("unexpected payload {:?}", payload),
    }
    volume.unmount();
}

#[test]
fn operations_on_unknown_handles_are_refused() {
    let volume = Volume::mount("C:\\mount\\nohandle", ContextFs);
    let reply =
        volume.call(Request::new(1, "\\foo.txt", 99, OperationKind::Read { offset: 0, length: 1 }));
    assert_eq!(reply.status, NtStatus::INVALID_HANDLE);
    volume.unmount();
}

#[test]
fn failed_create_leaves_no_handle_behind() {
    struct NullFs;
    impl FileSystemHandler for NullFs {}

    let volume = Volume::mount("C:\\mount\\nullfs", NullFs);
    assert_eq!(volume.call(create(1, "\\foo.txt", 1)).status, NtStatus::NOT_IMPLEMENTED);
    let reply =
        volume.call(Request::new(2, "\\foo.txt", 1, OperationKind::Read { offset: 0, length: 1 }));
    assert_eq!(reply.status, NtStatus::INVALID_HANDLE);
    volume.unmount();
}

#[test]
fn teardown_of_unknown_handles_skips_the_handler() {
    let (volume, seen) = delete_volume("C:\\mount\\neveropened");
    let cleanup = Request::new(1, "\\never.txt", 77, OperationKind::Cleanup);
    assert_eq!(volume.call(cleanup).status, NtStatus::SUCCESS);
    let close = Request::new(2, "\\never.txt", 77, OperationKind::Close);
    assert_eq!(volume.call(close).status, NtStatus::SUCCESS);
    assert!(seen.try_recv().is_err());
    volume.unmount();
}

/// Plain lister without pattern support.
struct ListFs;

impl FileSystemHandler for ListFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        info.set_is_directory(true);
        Ok(())
    }

    fn find_files(&self, _path: &str, _info: &OperationInfo<'_>) -> OperationResult<FindFilesIter> {
        Ok(Box::new(vec![entry("a.txt"), entry("b.log")].into_iter()))
    }
}

fn directory_names(reply: Reply) -> Vec<String> {
    match reply.payload {
        ReplyPayload::Directory(entries) => {
            entries.into_iter().map(|entry| entry.file_name).collect()
        }
        payload => panic!("unexpected payload {:?}", payload),
    }
}

#[test]
fn patterned_listing_falls_back_to_the_filtered_plain_listing() {
    let volume = Volume::mount("C:\\mount\\fallback", ListFs);
    volume.call(create(1, "\\", 1));
    let reply = volume.call(Request::new(
        2,
        "\\",
        1,
        OperationKind::FindFiles { pattern: Some("*.TXT".to_owned()) },
    ));
    assert_eq!(directory_names(reply), vec!["a.txt"]);
    let reply = volume.call(Request::new(3, "\\", 1, OperationKind::FindFiles { pattern: None }));
    assert_eq!(directory_names(reply), vec!["a.txt", "b.log"]);
    volume.unmount();
}

/// Pattern-aware lister; its entries must pass through unfiltered.
struct PatternFs;

impl FileSystemHandler for PatternFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn find_files_with_pattern(
        &self,
        _path: &str,
        pattern: &str,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<FindFilesIter> {
        Ok(Box::new(vec![entry(&format!("asked-for-{}", pattern))].into_iter()))
    }
}

#[test]
fn pattern_aware_listings_are_not_filtered() {
    let volume = Volume::mount("C:\\mount\\pattern", PatternFs);
    volume.call(create(1, "\\", 1));
    let reply = volume.call(Request::new(
        2,
        "\\",
        1,
        OperationKind::FindFiles { pattern: Some("*.txt".to_owned()) },
    ));
    assert_eq!(directory_names(reply), vec!["asked-for-*.txt"]);
    volume.unmount();
}

/// Records delete intent as observed during cleanup.
struct DeleteFs {
    events: Sender<String>,
}

impl FileSystemHandler for DeleteFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn cleanup(&self, path: &str, info: &OperationInfo<'_>) {
        let _ = self.events.send(format!("cleanup {} delete={}", path, info.delete_on_close()));
    }

    fn close_file(&self, path: &str, _info: &OperationInfo<'_>) {
        let _ = self.events.send(format!("close {}", path));
    }

    fn delete_file(&self, path: &str, _info: &OperationInfo<'_>) -> OperationResult<()> {
        if path == "\\locked.txt" {
            Err(NtStatus::ACCESS_DENIED)
        } else {
            Ok(())
        }
    }

    fn move_file(
        &self,
        _path: &str,
        _new_path: &str,
        _replace_if_existing: bool,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }
}

fn delete_volume(mount_point: &str) -> (Volume, Receiver<String>) {
    let (events, seen) = unbounded();
    (Volume::mount(mount_point, DeleteFs { events }), seen)
}

#[test]
fn delete_check_only_records_the_intent() {
    let (volume, seen) = delete_volume("C:\\mount\\del");
    volume.call(create(1, "\\doomed.txt", 1));
    assert_eq!(
        volume.call(Request::new(2, "\\doomed.txt", 1, OperationKind::DeleteFile)).status,
        NtStatus::SUCCESS
    );
    volume.call(Request::new(3, "\\doomed.txt", 1, OperationKind::Cleanup));
    volume.call(Request::new(4, "\\doomed.txt", 1, OperationKind::Close));
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "cleanup \\doomed.txt delete=true");
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "close \\doomed.txt");
    volume.unmount();
}

#[test]
fn refused_delete_cancels_the_intent() {
    let (volume, seen) = delete_volume("C:\\mount\\delrefused");
    volume.call(create(1, "\\locked.txt", 1));
    assert_eq!(
        volume.call(Request::new(2, "\\locked.txt", 1, OperationKind::DeleteFile)).status,
        NtStatus::ACCESS_DENIED
    );
    volume.call(Request::new(3, "\\locked.txt", 1, OperationKind::Cleanup));
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "cleanup \\locked.txt delete=false");
    volume.unmount();
}

#[test]
fn rename_cancels_the_delete_intent() {
    let (volume, seen) = delete_volume("C:\\mount\\delmoved");
    volume.call(create(1, "\\doomed.txt", 1));
    volume.call(Request::new(2, "\\doomed.txt", 1, OperationKind::DeleteFile));
    let rename = OperationKind::MoveFile {
        new_path: "\\saved.txt".to_owned(),
        replace_if_existing: false,
    };
    assert_eq!(
        volume.call(Request::new(3, "\\doomed.txt", 1, rename)).status,
        NtStatus::SUCCESS
    );
    volume.call(Request::new(4, "\\saved.txt", 1, OperationKind::Cleanup));
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "cleanup \\saved.txt delete=false");
    volume.unmount();
}

/// Answers volume queries; no file operations at all.
struct VolumeFs;

impl FileSystemHandler for VolumeFs {
    fn get_disk_free_space(&self, _info: &OperationInfo<'_>) -> OperationResult<DiskSpaceInfo> {
        Ok(DiskSpaceInfo { byte_count: 100, free_byte_count: 60, available_byte_count: 50 })
    }

    fn get_volume_information(&self, _info: &OperationInfo<'_>) -> OperationResult<VolumeInfo> {
        Ok(VolumeInfo {
            name: "TestVol".to_owned(),
            serial_number: 1,
            maximum_component_length: 255,
            filesystem_flags: 0,
            filesystem_name: "NTFS".to_owned(),
        })
    }
}

#[test]
fn volume_queries_need_no_open_handle() {
    let volume = Volume::mount("C:\\mount\\volinfo", VolumeFs);
    let reply = volume.call(Request::new(1, "", 0, OperationKind::GetDiskFreeSpace));
    match reply.payload {
        ReplyPayload::DiskSpace(space) => assert_eq!(space.free_byte_count, 60),
        payload => panic!("unexpected payload {:?}", payload),
    }
    volume.unmount();
}

#[test]
fn write_protected_mounts_advertise_a_read_only_volume() {
    let volume = Volume::mount_with("C:\\mount\\writeprot", VolumeFs, |options| {
        options.flags.write_protect = true;
    });
    let reply = volume.call(Request::new(1, "", 0, OperationKind::GetVolumeInformation));
    match reply.payload {
        ReplyPayload::VolumeInfo(info) => {
            assert_ne!(info.filesystem_flags & FILE_READ_ONLY_VOLUME, 0)
        }
        payload => panic!("unexpected payload {:?}", payload),
    }
    volume.unmount();
}

/// Grants every lock and records the calls.
struct LockFs {
    events: Sender<String>,
}

impl FileSystemHandler for LockFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn lock_file(
        &self,
        path: &str,
        offset: i64,
        length: i64,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        let _ = self.events.send(format!("lock {} {}..{}", path, offset, offset + length));
        Ok(())
    }
}

#[test]
fn locking_is_only_delivered_when_opted_in() {
    let (events, seen) = unbounded();
    let volume = Volume::mount("C:\\mount\\nolock", LockFs { events });
    volume.call(create(1, "\\a.txt", 1));
    let lock = OperationKind::LockFile { offset: 0, length: 10 };
    assert_eq!(
        volume.call(Request::new(2, "\\a.txt", 1, lock)).status,
        NtStatus::NOT_IMPLEMENTED
    );
    assert!(seen.try_recv().is_err());
    volume.unmount();

    let (events, seen) = unbounded();
    let volume = Volume::mount_with("C:\\mount\\lock", LockFs { events }, |options| {
        options.flags.user_mode_file_locking = true;
    });
    volume.call(create(1, "\\a.txt", 1));
    let lock = OperationKind::LockFile { offset: 0, length: 10 };
    assert_eq!(volume.call(Request::new(2, "\\a.txt", 1, lock)).status, NtStatus::SUCCESS);
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "lock \\a.txt 0..10");
    volume.unmount();
}

/// Hands out a fixed security descriptor.
struct SecurityFs;

impl FileSystemHandler for SecurityFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn get_file_security(
        &self,
        _path: &str,
        _security_information: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        Ok(vec![0xAA; 8])
    }
}

#[test]
fn short_security_buffers_learn_the_needed_length() {
    let volume = Volume::mount("C:\\mount\\security", SecurityFs);
    volume.call(create(1, "\\a.txt", 1));

    let query = OperationKind::GetFileSecurity { security_information: 0, buffer_length: 4 };
    let reply = volume.call(Request::new(2, "\\a.txt", 1, query));
    assert_eq!(reply.status, NtStatus::BUFFER_OVERFLOW);
    match reply.payload {
        ReplyPayload::Security { descriptor, length_needed } => {
            assert!(descriptor.is_empty());
            assert_eq!(length_needed, 8);
        }
        payload => panic!("unexpected payload {:?}", payload),
    }

    let query = OperationKind::GetFileSecurity { security_information: 0, buffer_length: 16 };
    let reply = volume.call(Request::new(3, "\\a.txt", 1, query));
    assert_eq!(reply.status, NtStatus::SUCCESS);
    match reply.payload {
        ReplyPayload::Security { descriptor, length_needed } => {
            assert_eq!(descriptor, vec![0xAA; 8]);
            assert_eq!(length_needed, 8);
        }
        payload => panic!("unexpected payload {:?}", payload),
    }
    volume.unmount();
}

/// Reads block for a while; with `extend` set they keep their deadline fresh.
struct SlowFs {
    extend: bool,
}

impl FileSystemHandler for SlowFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn read_file(
        &self,
        _path: &str,
        _offset: i64,
        _length: u32,
        info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        for _ in 0..4 {
            if self.extend {
                assert!(info.reset_timeout(Duration::from_secs(2)));
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(Vec::new())
    }
}

fn slow_volume(mount_point: &str, extend: bool) -> Volume {
    Volume::mount_with(mount_point, SlowFs { extend }, |options| {
        options.timeout = Duration::from_millis(150);
    })
}

#[test]
fn overdue_requests_are_reported_to_the_driver() {
    let volume = slow_volume("C:\\mount\\slow", false);
    volume.call(create(1, "\\a.txt", 1));
    volume
        .driver
        .submit(Request::new(2, "\\a.txt", 1, OperationKind::Read { offset: 0, length: 1 }))
        .unwrap();
    assert_eq!(volume.driver.recv_timeout_notification(WAIT), Some(2));
    // The reply still arrives once the operation finishes.
    let reply = volume.driver.recv_reply(WAIT).expect("no reply");
    assert_eq!(reply.unique, 2);
    volume.unmount();
}

#[test]
fn extended_requests_are_not_reported() {
    let volume = slow_volume("C:\\mount\\extended", true);
    volume.call(create(1, "\\a.txt", 1));
    volume
        .driver
        .submit(Request::new(2, "\\a.txt", 1, OperationKind::Read { offset: 0, length: 1 }))
        .unwrap();
    let reply = volume.driver.recv_reply(WAIT).expect("no reply");
    assert_eq!(reply.unique, 2);
    assert_eq!(reply.status, NtStatus::SUCCESS);
    assert_eq!(volume.driver.recv_timeout_notification(Duration::from_millis(200)), None);
    volume.unmount();
}

/// Records the mount lifecycle notifications.
struct LifecycleFs {
    events: Sender<String>,
}

impl FileSystemHandler for LifecycleFs {
    fn mounted(&self, info: &OperationInfo<'_>) -> OperationResult<()> {
        let _ = self.events.send(format!("mounted {}", info.mount_options().mount_point));
        Ok(())
    }

    fn unmounted(&self, _info: &OperationInfo<'_>) -> OperationResult<()> {
        let _ = self.events.send("unmounted".to_owned());
        Ok(())
    }
}

#[test]
fn unmount_through_the_registry_tears_the_session_down() {
    let (events, seen) = unbounded();
    let volume = Volume::mount("C:\\mount\\lifecycle", LifecycleFs { events });
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "mounted C:\\mount\\lifecycle");
    assert!(dokan::get_mount_point_list(false)
        .iter()
        .any(|info| info.mount_point == "C:\\mount\\lifecycle"));

    assert!(dokan::remove_mount_point("C:\\mount\\lifecycle\\"));
    volume.thread.join().unwrap();
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), "unmounted");
    assert!(!dokan::get_mount_point_list(false)
        .iter()
        .any(|info| info.mount_point == "C:\\mount\\lifecycle"));
    assert!(!dokan::remove_mount_point("C:\\mount\\lifecycle"));
}

/// Echoes the write-to-end flag of the request back through its reply.
struct AppendFs;

impl FileSystemHandler for AppendFs {
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn write_file(
        &self,
        _path: &str,
        _offset: i64,
        data: &[u8],
        info: &OperationInfo<'_>,
    ) -> OperationResult<u32> {
        if !info.write_to_end_of_file() {
            return Err(NtStatus::INVALID_PARAMETER);
        }
        Ok(data.len() as u32)
    }
}

#[test]
fn request_io_flags_reach_the_handler() {
    let volume = Volume::mount("C:\\mount\\append", AppendFs);
    volume.call(create(1, "\\a.txt", 1));
    let mut request =
        Request::new(2, "\\a.txt", 1, OperationKind::Write { offset: 0, data: vec![1, 2, 3] });
    request.flags.write_to_end_of_file = true;
    let reply = volume.call(request);
    assert_eq!(reply.status, NtStatus::SUCCESS);
    match reply.payload {
        ReplyPayload::Written(written) => assert_eq!(written, 3),
        payload => panic!("unexpected payload {:?}", payload),
    }
    volume.unmount();
}

#[test]
fn directory_handles_remember_their_kind() {
    let volume = Volume::mount("C:\\mount\\dirkind", ListFs);
    let mut request = create(1, "\\subdir", 1);
    if let OperationKind::Create { create_options, .. } = &mut request.kind {
        *create_options = FILE_DIRECTORY_FILE;
    }
    assert_eq!(volume.call(request).status, NtStatus::SUCCESS);
    let reply = volume.call(Request::new(2, "\\subdir", 1, OperationKind::FindFiles { pattern: None }));
    assert_eq!(directory_names(reply), vec!["a.txt", "b.log"]);
    volume.unmount();
}
