//! Small in-memory filesystem served over the loopback transport.
//!
//! There is no kernel driver on the other end; the demo plays the driver
//! itself through the `DriverStub`, submitting a handful of requests and
//! printing the replies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime};

use dokan::{
    loopback, DiskSpaceInfo, FileInfo, FileSystemHandler, FindData, FindFilesIter, MountOptions,
    NtStatus, OperationInfo, OperationKind, OperationResult, Reply, Request, Session, VolumeInfo,
};

#[derive(Default)]
struct MemFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileSystemHandler for MemFs {
    fn create_file(
        &self,
        path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        if path == "\\" {
            info.set_is_directory(true);
            return Ok(());
        }
        self.files.lock().unwrap().entry(path.to_owned()).or_default();
        Ok(())
    }

    fn read_file(
        &self,
        path: &str,
        offset: i64,
        length: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        let files = self.files.lock().unwrap();
        let data = files.get(path).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
        let start = (offset as usize).min(data.len());
        let end = (start + length as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn write_file(
        &self,
        path: &str,
        offset: i64,
        data: &[u8],
        info: &OperationInfo<'_>,
    ) -> OperationResult<u32> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(path).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
        let offset = if info.write_to_end_of_file() { file.len() } else { offset as usize };
        if file.len() < offset + data.len() {
            file.resize(offset + data.len(), 0);
        }
        file[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len() as u32)
    }

    fn get_file_information(
        &self,
        path: &str,
        info: &OperationInfo<'_>,
    ) -> OperationResult<FileInfo> {
        let files = self.files.lock().unwrap();
        let size = if info.is_directory() {
            0
        } else {
            files.get(path).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?.len() as u64
        };
        let now = SystemTime::now();
        Ok(FileInfo {
            attributes: if info.is_directory() {
                dokan::operations::FILE_ATTRIBUTE_DIRECTORY
            } else {
                dokan::operations::FILE_ATTRIBUTE_NORMAL
            },
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            file_size: size,
            number_of_links: 1,
            file_index: 0,
        })
    }

    fn find_files(&self, _path: &str, _info: &OperationInfo<'_>) -> OperationResult<FindFilesIter> {
        let now = SystemTime::now();
        let entries: Vec<FindData> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, data)| FindData {
                file_name: path.trim_start_matches('\\').to_owned(),
                attributes: dokan::operations::FILE_ATTRIBUTE_NORMAL,
                creation_time: now,
                last_access_time: now,
                last_write_time: now,
                file_size: data.len() as u64,
            })
            .collect();
        Ok(Box::new(entries.into_iter()))
    }

    fn get_disk_free_space(&self, _info: &OperationInfo<'_>) -> OperationResult<DiskSpaceInfo> {
        Ok(DiskSpaceInfo {
            byte_count: 1 << 30,
            free_byte_count: 1 << 29,
            available_byte_count: 1 << 29,
        })
    }

    fn get_volume_information(&self, _info: &OperationInfo<'_>) -> OperationResult<VolumeInfo> {
        Ok(VolumeInfo {
            name: "MemFs".to_owned(),
            serial_number: 0x1337,
            maximum_component_length: 255,
            filesystem_flags: dokan::operations::FILE_CASE_PRESERVED_NAMES
                | dokan::operations::FILE_UNICODE_ON_DISK,
            filesystem_name: "NTFS".to_owned(),
        })
    }
}

fn show(reply: Option<Reply>) {
    match reply {
        Some(reply) => println!("reply {}: {} {:?}", reply.unique, reply.status, reply.payload),
        None => println!("no reply"),
    }
}

fn main() {
    env_logger::init();
    let (transport, driver) = loopback();
    let options = MountOptions {
        mount_point: "M:\\".to_owned(),
        thread_count: 2,
        ..MountOptions::default()
    };
    let session = Session::mount(options, MemFs::default(), transport).unwrap();
    let fs = thread::spawn(move || session.run());

    let wait = Duration::from_secs(1);
    driver
        .submit(Request::new(
            1,
            "\\hello.txt",
            1,
            OperationKind::Create {
                desired_access: 0,
                file_attributes: 0,
                share_access: 0,
                create_disposition: dokan::operations::FILE_CREATE,
                create_options: 0,
            },
        ))
        .unwrap();
    show(driver.recv_reply(wait));
    driver
        .submit(Request::new(
            2,
            "\\hello.txt",
            1,
            OperationKind::Write { offset: 0, data: b"hello, world".to_vec() },
        ))
        .unwrap();
    show(driver.recv_reply(wait));
    driver
        .submit(Request::new(3, "\\hello.txt", 1, OperationKind::Read { offset: 0, length: 64 }))
        .unwrap();
    show(driver.recv_reply(wait));
    driver
        .submit(Request::new(
            4,
            "\\",
            2,
            OperationKind::Create {
                desired_access: 0,
                file_attributes: 0,
                share_access: 0,
                create_disposition: dokan::operations::FILE_OPEN,
                create_options: dokan::operations::FILE_DIRECTORY_FILE,
            },
        ))
        .unwrap();
    show(driver.recv_reply(wait));
    driver
        .submit(Request::new(5, "\\", 2, OperationKind::FindFiles { pattern: Some("*.txt".to_owned()) }))
        .unwrap();
    show(driver.recv_reply(wait));

    assert!(dokan::remove_mount_point("M:\\"));
    fs.join().unwrap();
}
