// 引入领域模型：指纹计算、远程数据条目和设备上的已安装应用。
use odp_domain::model::{content_fingerprint, RemoteDataEntry, UserData};
// 引入存储端口：远程数据的整体替换与下载指纹的记录。
use odp_domain::storage::{DownloadStateStore, RemoteDataStore};
// 引入 worker，用于决定哪些下载内容值得保留。
use odp_domain::worker::{DownloadCompletedInput, SampleWorker};
use metrics::counter;
use tracing::{debug, info};

use crate::source::Repository;
use crate::worker::DownloaderError;

/// What a single payload did to the stored remote data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The payload matched the last applied fingerprint.
    Unchanged,
    Applied { downloaded: usize, retained: usize },
}

// 处理一次下载得到的仓库内容。
// 泛型参数 `S` 同时提供远程数据与下载状态的持久化，测试时可以换成内存数据库。
pub async fn process_payload<S>(
    storage: &S,
    worker: &SampleWorker,
    payload: &[u8],
    user_data: &UserData,
) -> Result<PipelineOutcome, DownloaderError>
where
    S: RemoteDataStore + DownloadStateStore,
{
    // 步骤 1：指纹比对，内容和已安装应用都未变化时直接跳过。
    let fingerprint = download_fingerprint(payload, user_data);
    if storage.last_fingerprint().await?.as_deref() == Some(fingerprint.as_str()) {
        debug!(%fingerprint, "repository unchanged");
        counter!("downloader_payloads_total", "result" => "unchanged").increment(1);
        return Ok(PipelineOutcome::Unchanged);
    }

    // 步骤 2：解析仓库 JSON。解析失败不会更新指纹，下次轮询会重试。
    let repository: Repository = serde_json::from_slice(payload).map_err(|err| {
        counter!("downloader_payloads_total", "result" => "invalid").increment(1);
        DownloaderError::Payload(err.to_string())
    })?;
    let input = DownloadCompletedInput {
        contents: repository.into_remote_data(),
        user_data: user_data.clone(),
    };
    let downloaded = input.contents.len();

    // 步骤 3：交给 worker 过滤，只保留它挑出的 key。
    let output = worker.on_download_completed(&input);
    let contents = retain_keys(input.contents, &output.retained_keys);
    let retained = contents.len();

    // 步骤 4：整体替换远程数据，然后记录本次指纹。
    storage.replace_all(contents).await?;
    storage.upsert_fingerprint(&fingerprint).await?;

    counter!("downloader_payloads_total", "result" => "applied").increment(1);
    info!(downloaded, retained, %fingerprint, "remote data replaced");
    Ok(PipelineOutcome::Applied {
        downloaded,
        retained,
    })
}

// 指纹覆盖仓库内容和排序后的已安装应用，应用变化时会重新过滤。
fn download_fingerprint(payload: &[u8], user_data: &UserData) -> String {
    let installed: Vec<&str> = user_data
        .app_infos
        .iter()
        .filter(|(_, info)| info.installed)
        .map(|(app, _)| app.as_str())
        .collect();
    let mut input = payload.to_vec();
    input.push(b'\n');
    input.extend_from_slice(installed.join(",").as_bytes());
    content_fingerprint(&input)
}

fn retain_keys(contents: Vec<RemoteDataEntry>, keys: &[String]) -> Vec<RemoteDataEntry> {
    contents
        .into_iter()
        .filter(|entry| keys.contains(&entry.key))
        .collect()
}

// 单元测试模块：使用内存 SQLite 作为存储，worker 也由同一存储构建。
#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::download_worker;
    use odp_storage::SeaOrmStorage;
    use serde_json::json;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    // 生成测试用的仓库文档：两条广告（其中一条被已安装应用屏蔽）、一个模型和一个未知 key。
    fn repository() -> Vec<u8> {
        let open_ad = json!({"max_cpc": 1.0, "keywords": ["shoes"]}).to_string();
        let blocked_ad = json!({
            "max_cpc": 1.0,
            "keywords": ["shoes"],
            "excludes": ["com.example.blocker"],
        })
        .to_string();
        json!({"contents": [
            {"key": "ad1", "data": open_ad},
            {"key": "ad2", "data": blocked_ad},
            {"key": "model1", "data": "{\"weights\":[1.0]}"},
            {"key": "unrelated", "data": "x"},
        ]})
        .to_string()
        .into_bytes()
    }

    // 测试用例：被屏蔽的广告和未知 key 不会写入存储，指纹被记录。
    #[tokio::test]
    async fn keeps_only_retained_entries() {
        let storage = storage().await;
        let worker = download_worker(&storage);
        let user_data = UserData::from_installed(["com.example.blocker"]);
        let payload = repository();

        let outcome = process_payload(&storage, &worker, &payload, &user_data)
            .await
            .expect("payload applies");

        assert_eq!(
            outcome,
            PipelineOutcome::Applied {
                downloaded: 4,
                retained: 2
            }
        );
        assert_eq!(storage.keys().await.unwrap(), vec!["ad1", "model1"]);
        assert_eq!(
            storage.last_fingerprint().await.unwrap(),
            Some(download_fingerprint(&payload, &user_data))
        );
    }

    // 测试用例：同一份内容第二次出现时跳过，不触碰存储。
    #[tokio::test]
    async fn skips_unchanged_payloads() {
        let storage = storage().await;
        let worker = download_worker(&storage);
        let payload = repository();

        process_payload(&storage, &worker, &payload, &UserData::default())
            .await
            .unwrap();
        storage.replace_all(Vec::new()).await.unwrap();

        let outcome = process_payload(&storage, &worker, &payload, &UserData::default())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Unchanged);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    // 测试用例：内容不变但已安装应用变化时，重新过滤并替换存储。
    #[tokio::test]
    async fn installed_app_changes_reapply_same_payload() {
        let storage = storage().await;
        let worker = download_worker(&storage);
        let payload = repository();

        process_payload(&storage, &worker, &payload, &UserData::default())
            .await
            .unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["ad1", "ad2", "model1"]);

        let blocked = UserData::from_installed(["com.example.blocker"]);
        let outcome = process_payload(&storage, &worker, &payload, &blocked)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Applied {
                downloaded: 4,
                retained: 2
            }
        );
        assert_eq!(storage.keys().await.unwrap(), vec!["ad1", "model1"]);

        let unchanged = process_payload(&storage, &worker, &payload, &blocked)
            .await
            .unwrap();
        assert_eq!(unchanged, PipelineOutcome::Unchanged);
    }

    // 测试用例：重复 key 不会触发主键冲突，最后一条生效。
    #[tokio::test]
    async fn duplicate_keys_do_not_break_replacement() {
        let storage = storage().await;
        let worker = download_worker(&storage);
        let payload = json!({"contents": [
            {"key": "model1", "data": "{\"weights\":[0.5]}"},
            {"key": "model1", "data": "{\"weights\":[1.0]}"},
        ]})
        .to_string();

        let outcome = process_payload(&storage, &worker, payload.as_bytes(), &UserData::default())
            .await
            .expect("duplicates collapse");
        assert_eq!(
            outcome,
            PipelineOutcome::Applied {
                downloaded: 1,
                retained: 1
            }
        );
        assert_eq!(
            storage.get("model1").await.unwrap(),
            Some(br#"{"weights":[1.0]}"#.to_vec())
        );
    }

    // 测试用例：无法解析的内容返回错误，且不记录指纹。
    #[tokio::test]
    async fn rejects_malformed_payloads() {
        let storage = storage().await;
        let worker = download_worker(&storage);

        let err = process_payload(&storage, &worker, b"not json", &UserData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloaderError::Payload(_)));
        assert_eq!(storage.last_fingerprint().await.unwrap(), None);
    }
}
