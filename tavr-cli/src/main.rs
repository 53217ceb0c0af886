//! TAVR分析系统命令行工具

mod analyze;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tavr_admin::{init_logging, LoggingOptions, SettingsManager};
use tavr_core::{Sex, ValveSize, ValveType};
use tavr_storage::DataLayout;
use tracing::info;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "tavr")]
#[command(about = "TAVR分析系统实用工具")]
struct Args {
    /// 系统基础目录
    #[arg(short, long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// 配置文件路径（默认为 <基础目录>/config.ini）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 清理缓存和日志
    Clean {
        /// 清理多少天前的缓存
        #[arg(long, default_value_t = 7)]
        cache_days: u32,
        /// 清理多少天前的日志
        #[arg(long, default_value_t = 30)]
        log_days: u32,
    },
    /// 导出患者数据
    Export {
        /// 患者ID
        patient_id: String,
        /// 输出文件名
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 导入患者数据
    Import {
        /// 导入的zip文件
        file: PathBuf,
    },
    /// 列出所有患者
    List,
    /// 显示系统统计
    Stats,
    /// 备份系统数据
    Backup {
        /// 备份文件名
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 校验备份文件
    Verify {
        /// 备份zip文件
        file: PathBuf,
    },
    /// 检查系统完整性
    Check,
    /// 重置系统设置
    Reset {
        /// 不再询问确认
        #[arg(short, long)]
        yes: bool,
    },
    /// 初始化目录结构、默认配置和患者模板
    Init,
    /// 对DICOM序列执行完整分析流程
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// DICOM序列目录
    pub dicom_dir: PathBuf,
    /// 患者ID（默认取自DICOM）
    #[arg(long)]
    pub patient_id: Option<String>,
    /// 患者姓名
    #[arg(long)]
    pub name: Option<String>,
    /// 年龄
    #[arg(long)]
    pub age: Option<u8>,
    /// 性别（男/女）
    #[arg(long)]
    pub sex: Option<Sex>,
    /// 瓣膜类型
    #[arg(long, default_value = "Edwards SAPIEN 3")]
    pub valve_type: ValveType,
    /// 瓣膜尺寸
    #[arg(long, default_value = "26mm")]
    pub valve_size: ValveSize,
    /// 结果输出目录（默认为 <基础目录>/results）
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// 跳过模拟等待时间
    #[arg(long)]
    pub fast: bool,
    /// 模拟随机种子
    #[arg(long)]
    pub seed: Option<u64>,
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn list_patients(layout: &DataLayout) -> Result<()> {
    let patients = layout.list_patients()?;
    println!("患者列表:");
    println!("{}", "-".repeat(60));
    if patients.is_empty() {
        println!("无患者数据");
        return Ok(());
    }
    for p in &patients {
        println!("ID: {:<15} 姓名: {:<20} 检查日期: {}", p.patient_id, p.name, p.study_date);
    }
    println!("{}", "-".repeat(60));
    println!("共 {} 位患者", patients.len());
    Ok(())
}

fn print_statistics(layout: &DataLayout) -> Result<()> {
    let stats = layout.statistics()?;
    println!("系统使用统计");
    println!("{}", "=".repeat(60));
    println!("患者总数: {}", stats.patient_count);
    println!("结果文件数: {}", stats.result_file_count);
    if !stats.file_types.is_empty() {
        println!("\n文件类型分布:");
        for (ext, count) in &stats.file_types {
            let ext = if ext.is_empty() { "(无扩展名)" } else { ext.as_str() };
            println!("  {}: {}", ext, count);
        }
    }
    println!("\n磁盘使用:");
    for (label, bytes) in &stats.disk_usage {
        println!("  {}: {:.2} MB", label, megabytes(*bytes));
    }
    println!("\n最近修改的文件:");
    for file in &stats.recent_files {
        println!("  {} - {}", file.modified.format("%Y-%m-%d %H:%M:%S"), file.file_name());
    }
    Ok(())
}

fn check(layout: &DataLayout) -> ExitCode {
    println!("检查系统完整性...");
    println!("{}", "-".repeat(60));
    let report = layout.check_integrity();
    if report.is_ok() {
        println!("✓ 系统完整性检查通过");
        ExitCode::SUCCESS
    } else {
        println!("发现以下问题:");
        for issue in &report.issues {
            println!("  ✗ {}", issue);
        }
        println!("\n建议运行 tavr init 修复问题");
        ExitCode::FAILURE
    }
}

fn reset(config_path: &Path, yes: bool) -> Result<()> {
    if !yes && !confirm("确定要重置设置吗？(y/n): ")? {
        println!("已取消");
        return Ok(());
    }
    // 现有配置无效时也允许重置
    let mut manager = SettingsManager::with_defaults(config_path);
    if let Some(backup) = manager.reset()? {
        println!("当前设置已备份到: {}", backup.display());
    }
    println!("设置已重置为默认值");
    Ok(())
}

fn init(layout: &DataLayout, config_path: &Path) -> Result<()> {
    layout.ensure_directories()?;
    if config_path.is_file() {
        println!("配置文件已存在: {}", config_path.display());
    } else {
        SettingsManager::with_defaults(config_path).save()?;
        println!("创建配置文件: {}", config_path.display());
    }
    let template = layout.write_patient_template()?;
    println!("创建患者数据模板: {}", template.display());
    println!("初始化完成: {}", layout.base().display());
    Ok(())
}

async fn run(args: Args) -> Result<ExitCode> {
    let layout = DataLayout::new(&args.base_dir);
    let config_path = args
        .config
        .clone()
        .map(|p| layout.resolve(p))
        .unwrap_or_else(|| layout.config_file());

    let mut logging = LoggingOptions {
        level: args.log_level.clone(),
        ..Default::default()
    };

    // 分析流程的日志同时写入文件，其余命令只输出到控制台
    if !matches!(args.command, Command::Analyze(_)) {
        init_logging(&logging)?;
    }

    match args.command {
        Command::Clean { cache_days, log_days } => {
            println!("清理{}天前的缓存文件...", cache_days);
            let cache = layout.clean_cache(cache_days)?;
            println!(
                "已删除 {} 个文件，释放 {:.2} MB 空间",
                cache.removed_files,
                cache.removed_megabytes()
            );
            println!("清理{}天前的日志文件...", log_days);
            let logs = layout.clean_logs(log_days)?;
            println!("已删除 {} 个日志文件", logs.removed_files);
        }
        Command::Export { patient_id, output } => {
            let summary = layout
                .export_patient(&patient_id, output.as_deref())
                .with_context(|| format!("导出患者 {} 失败", patient_id))?;
            println!("数据已导出到: {} ({} 个文件)", summary.path.display(), summary.file_count);
        }
        Command::Import { file } => {
            let summary = layout.import_archive(&file).context("导入失败")?;
            println!("数据导入成功: {} 个文件", summary.file_count);
        }
        Command::List => {
            list_patients(&layout)?;
        }
        Command::Stats => {
            print_statistics(&layout)?;
        }
        Command::Backup { output } => {
            let (summary, _) = layout.backup(output.as_deref())?;
            println!(
                "备份完成: {} ({:.2} MB)",
                summary.path.display(),
                summary.archive_megabytes()
            );
        }
        Command::Verify { file } => {
            let count = layout.verify_backup(&file)?;
            println!("备份校验通过: {} 个文件", count);
        }
        Command::Check => {
            return Ok(check(&layout));
        }
        Command::Reset { yes } => {
            reset(&config_path, yes)?;
        }
        Command::Init => {
            init(&layout, &config_path)?;
        }
        Command::Analyze(analyze_args) => {
            let manager = SettingsManager::load(&config_path)
                .with_context(|| format!("加载配置失败: {}", config_path.display()))?;
            logging.verbose = manager.settings().advanced.verbose_logging;
            logging.log_dir = Some(layout.logs_dir());
            init_logging(&logging)?;
            info!("TAVR分析开始");
            analyze::run(&layout, manager.settings().clone(), analyze_args).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    run(args).await
}
