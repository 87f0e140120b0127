//! 本地输入收集
//!
//! 把命令行给出的路径展开成有序的待上传文件列表：
//! - 文件按参数顺序原样保留
//! - 目录展开为其下的常规文件，按路径排序
//! - 同一文件只保留第一次出现

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 输入收集配置
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// 是否进入子目录
    pub recursive: bool,
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
    /// 目录展开时只收集这些扩展名（不区分大小写），None 表示全部
    pub extensions: Option<Vec<String>>,
    /// 最大文件数量，达到后停止收集
    pub max_files: Option<usize>,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            skip_hidden: true,
            extensions: None,
            max_files: None,
        }
    }
}

/// 输入收集器
#[derive(Debug, Clone, Default)]
pub struct InputCollector {
    options: InputOptions,
}

impl InputCollector {
    pub fn new(options: InputOptions) -> Self {
        Self { options }
    }

    /// 展开所有输入路径
    pub fn collect<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();

        for input in inputs {
            if self.limit_reached(files.len()) {
                warn!("已达到最大文件数量限制 ({:?}), 忽略剩余输入", self.options.max_files);
                break;
            }

            let input = input.as_ref();
            let metadata = std::fs::metadata(input)
                .with_context(|| format!("输入路径不存在: {}", input.display()))?;

            if metadata.is_dir() {
                for path in self.expand_dir(input)? {
                    if self.limit_reached(files.len()) {
                        break;
                    }
                    if seen.insert(path.clone()) {
                        files.push(path);
                    }
                }
            } else if metadata.is_file() {
                if seen.insert(input.to_path_buf()) {
                    files.push(input.to_path_buf());
                }
            } else {
                anyhow::bail!("输入路径不是文件或文件夹: {}", input.display());
            }
        }

        info!("收集到 {} 个待上传文件", files.len());
        Ok(files)
    }

    /// 展开单个目录（非递归实现，避免深目录栈溢出）
    fn expand_dir(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        // 跟随符号链接时同一目录可能经多条路径到达，按真实路径去重以免成环
        let mut visited = HashSet::new();

        while let Some(dir) = pending.pop() {
            let real = std::fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
            if !visited.insert(real) {
                debug!("跳过已展开的目录: {}", dir.display());
                continue;
            }

            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("读取目录失败: {}", dir.display()))?;

            for entry in entries {
                let entry = entry.with_context(|| format!("读取目录条目失败: {}", dir.display()))?;
                let path = entry.path();

                if self.options.skip_hidden && is_hidden(&path) {
                    debug!("跳过隐藏文件: {}", path.display());
                    continue;
                }

                let metadata = if self.options.follow_symlinks {
                    std::fs::metadata(&path)
                } else {
                    std::fs::symlink_metadata(&path)
                }
                .with_context(|| format!("读取文件元数据失败: {}", path.display()))?;

                if metadata.is_dir() {
                    if self.options.recursive {
                        pending.push(path);
                    }
                } else if metadata.is_file() {
                    if self.extension_allowed(&path) {
                        files.push(path);
                    }
                } else {
                    debug!("跳过非常规文件: {}", path.display());
                }
            }
        }

        files.sort();
        debug!("目录 {} 展开为 {} 个文件", root.display(), files.len());
        Ok(files)
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        let Some(allowed) = &self.options.extensions else {
            return true;
        };
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        allowed
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn limit_reached(&self, count: usize) -> bool {
        self.options.max_files.is_some_and(|max| count >= max)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // root/
    // ├── b.png
    // ├── a.jpg
    // ├── .thumbs.db
    // ├── notes.txt
    // └── nested/
    //     └── deep/
    //         └── c.PNG
    fn create_test_folder() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("b.png"), "b").unwrap();
        fs::write(root.join("a.jpg"), "a").unwrap();
        fs::write(root.join(".thumbs.db"), "x").unwrap();
        fs::write(root.join("notes.txt"), "n").unwrap();
        fs::create_dir_all(root.join("nested/deep")).unwrap();
        fs::write(root.join("nested/deep/c.PNG"), "c").unwrap();

        temp_dir
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_expand_directory_sorted() {
        let dir = create_test_folder();
        let files = InputCollector::default().collect(&[dir.path()]).unwrap();

        assert_eq!(names(&files), vec!["a.jpg", "b.png", "c.PNG", "notes.txt"]);
    }

    #[test]
    fn test_files_keep_argument_order_and_dedup() {
        let dir = create_test_folder();
        let b = dir.path().join("b.png");
        let a = dir.path().join("a.jpg");

        let files = InputCollector::default()
            .collect(&[b.clone(), a.clone(), b.clone()])
            .unwrap();
        assert_eq!(files, vec![b, a]);
    }

    #[test]
    fn test_extension_filter_and_non_recursive() {
        let dir = create_test_folder();
        let options = InputOptions {
            extensions: Some(vec!["png".to_string(), ".jpg".to_string()]),
            ..Default::default()
        };
        let files = InputCollector::new(options.clone())
            .collect(&[dir.path()])
            .unwrap();
        assert_eq!(names(&files), vec!["a.jpg", "b.png", "c.PNG"]);

        let flat = InputCollector::new(InputOptions {
            recursive: false,
            ..options
        })
        .collect(&[dir.path()])
        .unwrap();
        assert_eq!(names(&flat), vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_hidden_files_optional() {
        let dir = create_test_folder();
        let files = InputCollector::new(InputOptions {
            skip_hidden: false,
            ..Default::default()
        })
        .collect(&[dir.path()])
        .unwrap();
        assert!(names(&files).contains(&".thumbs.db".to_string()));
    }

    #[test]
    fn test_max_files() {
        let dir = create_test_folder();
        let files = InputCollector::new(InputOptions {
            max_files: Some(2),
            ..Default::default()
        })
        .collect(&[dir.path()])
        .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_expanded_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("album")).unwrap();
        fs::write(root.join("album/cat.png"), "c").unwrap();
        fs::write(root.join("dog.png"), "d").unwrap();
        // album/back -> root，形成环
        std::os::unix::fs::symlink(root, root.join("album/back")).unwrap();

        let following = InputCollector::new(InputOptions {
            follow_symlinks: true,
            ..Default::default()
        })
        .collect(&[root])
        .unwrap();
        assert_eq!(
            following,
            vec![root.join("album/cat.png"), root.join("dog.png")]
        );

        // 不跟随时链接本身被跳过
        let plain = InputCollector::default().collect(&[root]).unwrap();
        assert_eq!(plain, following);
    }

    #[test]
    fn test_missing_input_fails() {
        let result = InputCollector::default().collect(&["/nonexistent/input.png"]);
        assert!(result.unwrap_err().to_string().contains("输入路径不存在"));
    }
}
