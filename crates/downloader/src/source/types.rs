// 广告服务器下发的仓库文件格式：`{"contents":[{"key": ..., "data": ...}]}`。
use std::collections::HashMap;

use odp_domain::model::RemoteDataEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// 整个仓库文档，只关心 `contents` 数组。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub contents: Vec<RepositoryEntry>,
}

// 单条远程数据：`key` 决定用途（ad/template/example/model 前缀）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub key: String,
    // 通常是字符串；若服务器直接内嵌 JSON 对象，则按紧凑 JSON 文本保存。
    pub data: Value,
}

impl RepositoryEntry {
    pub fn into_remote_data(self) -> RemoteDataEntry {
        let data = match self.data {
            Value::String(text) => text,
            other => other.to_string(),
        };
        RemoteDataEntry::new(self.key, data)
    }
}

impl Repository {
    // 重复的 key 以最后一条为准，位置保持第一次出现的位置。
    pub fn into_remote_data(self) -> Vec<RemoteDataEntry> {
        let mut entries: Vec<RemoteDataEntry> = Vec::with_capacity(self.contents.len());
        let mut positions = HashMap::new();
        for entry in self.contents.into_iter().map(RepositoryEntry::into_remote_data) {
            match positions.get(&entry.key).copied() {
                Some(index) => entries[index] = entry,
                None => {
                    positions.insert(entry.key.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }
        entries
    }
}
